//! Fuel-flow resolution: which tanks feed a given propellant draw.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    graph::VesselGraph,
    resource::{FlowMode, ResourceId},
    vessel::{AttachNodeType, Attachment, PartId},
};

/// Flows accumulated for one iteration before they are committed to the
/// graph (kg/s per part and resource).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlowMap {
    flows: BTreeMap<(PartId, ResourceId), f64>,
}

impl FlowMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, part: PartId, res: ResourceId, rate: f64) {
        *self.flows.entry((part, res)).or_insert(0.0) += rate;
    }

    pub fn get(&self, part: PartId, res: ResourceId) -> f64 {
        self.flows.get(&(part, res)).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Sum of every pending flow.
    pub fn total(&self) -> f64 {
        self.flows.values().sum()
    }
}

impl IntoIterator for FlowMap {
    type Item = (PartId, ResourceId, f64);
    type IntoIter = std::iter::Map<
        std::collections::btree_map::IntoIter<(PartId, ResourceId), f64>,
        fn(((PartId, ResourceId), f64)) -> (PartId, ResourceId, f64),
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.flows.into_iter().map(|((p, r), f)| (p, r, f))
    }
}

impl FromIterator<(PartId, ResourceId, f64)> for FlowMap {
    fn from_iter<I: IntoIterator<Item = (PartId, ResourceId, f64)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (part, res, rate) in iter {
            map.add(part, res, rate);
        }
        map
    }
}

/// Finds the tanks `start` draws `propellant` from.
pub fn resolve_tanks(graph: &VesselGraph<'_>, propellant: ResourceId, start: PartId) -> Vec<PartId> {
    get_tanks(graph, propellant, start, &mut BTreeSet::new())
}

/// Recursive tank search. `visited` is shared by the whole resolution of
/// one propellant for one engine.
pub fn get_tanks(
    graph: &VesselGraph<'_>,
    propellant: ResourceId,
    start: PartId,
    visited: &mut BTreeSet<PartId>,
) -> Vec<PartId> {
    let Some(node) = graph.node(start) else {
        return vec![];
    };
    let own = node.resource_mass(propellant);

    if graph.library().flow_mode(propellant) == FlowMode::NoFlow {
        return if own.is_some_and(|m| m > 0.0) {
            vec![start]
        } else {
            vec![]
        };
    }

    if !visited.insert(start) {
        return vec![];
    }

    let mut result = vec![];
    for linked in &node.linked_parts {
        if graph.contains(*linked) {
            extend_unique(&mut result, get_tanks(graph, propellant, *linked, visited));
        }
    }
    if !result.is_empty() {
        return result;
    }

    let part = graph.part(start);
    if part.fuel_cross_feed {
        let key = part.no_cross_feed_node_key.as_str();
        for attach in &part.attach_nodes {
            let Some(attached) = attach.attached_part else {
                continue;
            };
            if attach.node_type != AttachNodeType::Stack
                || !graph.contains(attached)
                || attach.id == "Strut"
                || (!key.is_empty() && attach.id.contains(key))
            {
                continue;
            }
            extend_unique(&mut result, get_tanks(graph, propellant, attached, visited));
        }
        if !result.is_empty() {
            return result;
        }
    }

    match own {
        Some(m) if m > 0.0 => return vec![start],
        Some(_) => return vec![],
        None => {}
    }

    if part.fuel_cross_feed && part.attachment == Attachment::Radial {
        if let Some(parent) = part.parent.filter(|p| graph.contains(*p)) {
            return get_tanks(graph, propellant, parent, visited);
        }
    }

    vec![]
}

fn extend_unique(result: &mut Vec<PartId>, tanks: Vec<PartId>) {
    for tank in tanks {
        if !result.contains(&tank) {
            result.push(tank);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vessel::{Part, VesselSnapshot};

    struct Fixture {
        vessel: VesselSnapshot,
        lf: ResourceId,
        solid: ResourceId,
    }

    fn fixture() -> Fixture {
        let vessel = VesselSnapshot::new("flow");
        let lf = vessel.resources.id_by_name("LiquidFuel").unwrap();
        let solid = vessel.resources.id_by_name("SolidFuel").unwrap();
        Fixture { vessel, lf, solid }
    }

    #[test]
    fn stack_search_prefers_upper_tanks() {
        let Fixture { mut vessel, lf, .. } = fixture();
        let upper = vessel.add_part(Part::new("upper").with_resource(lf, 10.0));
        let lower = vessel.add_part(Part::new("lower").with_resource(lf, 10.0));
        let engine = vessel.add_part(Part::new("engine"));
        vessel.attach_stack(upper, lower);
        vessel.attach_stack(lower, engine);

        let graph = VesselGraph::new(&vessel).unwrap();
        let first = resolve_tanks(&graph, lf, engine);
        assert_eq!(first, vec![upper]);
        assert_eq!(resolve_tanks(&graph, lf, engine), first);
    }

    #[test]
    fn no_flow_resources_stay_put() {
        let Fixture {
            mut vessel, solid, ..
        } = fixture();
        let neighbour = vessel.add_part(Part::new("neighbour").with_resource(solid, 10.0));
        let booster = vessel.add_part(Part::new("booster").with_resource(solid, 10.0));
        let empty = vessel.add_part(Part::new("empty"));
        vessel.attach_stack(neighbour, booster);
        vessel.attach_stack(booster, empty);

        let graph = VesselGraph::new(&vessel).unwrap();
        assert_eq!(resolve_tanks(&graph, solid, booster), vec![booster]);
        assert!(resolve_tanks(&graph, solid, empty).is_empty());
    }

    #[test]
    fn fuel_lines_take_priority_and_cycles_terminate() {
        let Fixture { mut vessel, lf, .. } = fixture();
        let core = vessel.add_part(Part::new("core").with_resource(lf, 10.0));
        let left = vessel.add_part(Part::new("left").with_resource(lf, 10.0));
        let right = vessel.add_part(Part::new("right").with_resource(lf, 10.0));
        vessel.attach_surface(core, left);
        vessel.attach_surface(core, right);
        vessel.add_fuel_line(left, core);
        vessel.add_fuel_line(right, left);
        vessel.add_fuel_line(core, right);

        let graph = VesselGraph::new(&vessel).unwrap();
        let tanks = resolve_tanks(&graph, lf, core);
        assert!(!tanks.is_empty());
        assert!(tanks.iter().all(|t| [core, left, right].contains(t)));
    }

    #[test]
    fn fuel_line_feeds_from_its_source() {
        let Fixture { mut vessel, lf, .. } = fixture();
        let core = vessel.add_part(Part::new("core").with_resource(lf, 10.0));
        let side = vessel.add_part(Part::new("side").with_resource(lf, 10.0));
        vessel.attach_surface(core, side);
        vessel.add_fuel_line(side, core);

        let graph = VesselGraph::new(&vessel).unwrap();
        assert_eq!(resolve_tanks(&graph, lf, core), vec![side]);
    }

    #[test]
    fn crossfeed_exclusions() {
        let Fixture { mut vessel, lf, .. } = fixture();
        let tank = vessel.add_part(Part::new("tank").with_resource(lf, 10.0));
        let mut blocked = Part::new("blocked");
        blocked.no_cross_feed_node_key = "top".into();
        let blocked = vessel.add_part(blocked);
        vessel.attach_stack(tank, blocked);

        let strut = vessel.add_part(Part::new("strutted"));
        vessel.attach_stack_at(tank, "Strut", strut, "Strut");

        let graph = VesselGraph::new(&vessel).unwrap();
        assert!(resolve_tanks(&graph, lf, blocked).is_empty());
        assert!(resolve_tanks(&graph, lf, strut).is_empty());
    }

    #[test]
    fn surface_parts_fall_back_to_their_parent() {
        let Fixture { mut vessel, lf, .. } = fixture();
        let tank = vessel.add_part(Part::new("tank").with_resource(lf, 10.0));
        let radial = vessel.add_part(Part::new("radial engine"));
        vessel.attach_surface(tank, radial);

        let mut empty = Part::new("empty tank").with_resource(lf, 0.0);
        empty.fuel_cross_feed = false;
        let empty = vessel.add_part(empty);
        vessel.attach_surface(tank, empty);

        let graph = VesselGraph::new(&vessel).unwrap();
        assert_eq!(resolve_tanks(&graph, lf, radial), vec![tank]);
        assert!(resolve_tanks(&graph, lf, empty).is_empty());
    }
}

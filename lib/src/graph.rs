//! The live model of a vessel during a staging run.
//!
//! Every retained part becomes a [`Node`] holding its remaining propellant
//! mass and the flow drawn from it this iteration. Nodes are only ever
//! removed, when the parts they model are decoupled.

use std::collections::{BTreeMap, BTreeSet};

use color_eyre::eyre;
use nalgebra::Vector3;
use ordered_float::OrderedFloat;
use tracing::trace;

use crate::{
    arena::Arena,
    flow::FlowMap,
    resource::{ResourceId, ResourceLibrary},
    vessel::{Part, PartId, VesselSnapshot},
};

/// Flows at or below this rate (kg/s) never deplete anything.
pub const FLOW_EPSILON: f64 = 1e-9;

/// Leftover mass (kg) treated as an empty tank after a burn.
pub const DEPLETED_MASS: f64 = 1e-9;

/// Fuel mass (kg) below which a subtree counts as empty for decoupling.
pub const RESIDUAL_FUEL: f64 = 0.1;

/// Cosine of the largest angle between vessel-forward and an engine's mean
/// thrust for it to still count as a main engine.
pub const SEPRATRON_ALIGNMENT: f64 = 0.8;

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub part: PartId,
    /// Remaining mass per resource (kg)
    resource_mass: BTreeMap<ResourceId, f64>,
    /// Draw per resource for the current iteration (kg/s)
    resource_flow: BTreeMap<ResourceId, f64>,
    /// Dry mass plus disabled resources (kg)
    base_mass: f64,
    /// Parts carrying a fuel line that targets this node.
    pub linked_parts: Vec<PartId>,
    exhaust_hits: Vec<PartId>,
    pub is_sepratron: bool,
}

impl Node {
    pub fn new(id: PartId, part: &Part, library: &ResourceLibrary, forward: Vector3<f64>) -> Self {
        let mut resource_mass = BTreeMap::new();
        let mut disabled_mass = 0.0;
        for (&res, stored) in &part.resources {
            let density = library.get(res).map_or(0.0, |d| d.density);
            let mass = stored.amount * density * 1000.0;
            if stored.enabled {
                resource_mass.insert(res, mass);
            } else {
                resource_mass.insert(res, 0.0);
                disabled_mass += mass;
            }
        }

        let base_mass = if part.physically_significant {
            part.mass * 1000.0 + disabled_mass
        } else {
            0.0
        };

        let exhaust_hits = part
            .modules
            .engines
            .iter()
            .flat_map(|e| e.exhaust_hits.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Self {
            part: id,
            resource_mass,
            resource_flow: BTreeMap::new(),
            base_mass,
            linked_parts: vec![],
            exhaust_hits,
            is_sepratron: is_sepratron(part, forward),
        }
    }

    /// Total mass of the part as it currently stands (kg).
    pub fn mass(&self) -> f64 {
        self.base_mass + self.resource_mass.values().sum::<f64>()
    }

    /// Remaining mass of `res`, or `None` if this part does not store it.
    pub fn resource_mass(&self, res: ResourceId) -> Option<f64> {
        self.resource_mass.get(&res).copied()
    }

    pub fn resources(&self) -> impl Iterator<Item = (ResourceId, f64)> + '_ {
        self.resource_mass.iter().map(|(id, m)| (*id, *m))
    }

    pub fn flow(&self, res: ResourceId) -> f64 {
        self.resource_flow.get(&res).copied().unwrap_or(0.0)
    }

    pub fn add_flow(&mut self, res: ResourceId, rate: f64) {
        *self.resource_flow.entry(res).or_insert(0.0) += rate;
    }

    /// Time until the first of this node's resources runs out at the
    /// current flows, or infinity if none is being drawn.
    pub fn next_event(&self) -> f64 {
        self.resource_mass
            .iter()
            .filter_map(|(res, mass)| {
                let flow = self.flow(*res);
                (flow > FLOW_EPSILON).then(|| OrderedFloat(mass / flow))
            })
            .min()
            .map_or(f64::INFINITY, |t| t.0)
    }

    /// Draws the current flows for `dt` seconds, then resets them.
    /// Returns whether any resource ran out.
    pub fn apply_fuel_consumption(&mut self, dt: f64) -> bool {
        let mut depleted = false;
        for (res, flow) in std::mem::take(&mut self.resource_flow) {
            let Some(mass) = self.resource_mass.get_mut(&res) else {
                continue;
            };
            if *mass == 0.0 || flow == 0.0 {
                continue;
            }
            *mass -= flow * dt;
            if *mass <= DEPLETED_MASS {
                *mass = 0.0;
                depleted = true;
            }
        }
        depleted
    }
}

fn is_sepratron(part: &Part, forward: Vector3<f64>) -> bool {
    let (sum, count) = part
        .modules
        .engines
        .iter()
        .flat_map(|e| e.thrust_directions.iter())
        .fold((Vector3::<f64>::zeros(), 0usize), |(sum, n), d| (sum + d, n + 1));
    if count == 0 {
        return false;
    }
    let mean = sum / count as f64;
    match (forward.try_normalize(0.0), mean.try_normalize(0.0)) {
        (Some(forward), Some(thrust)) => forward.dot(&thrust) <= SEPRATRON_ALIGNMENT,
        _ => false,
    }
}

/// The parts still attached to the vessel, each wrapped in a [`Node`].
#[derive(Clone, Debug)]
pub struct VesselGraph<'a> {
    vessel: &'a VesselSnapshot,
    nodes: Arena<PartId, Node>,
}

impl<'a> VesselGraph<'a> {
    /// Builds the graph for every part except launch clamps.
    pub fn new(vessel: &'a VesselSnapshot) -> eyre::Result<Self> {
        vessel.validate()?;

        let mut nodes: Arena<PartId, Node> = vessel
            .parts
            .iter()
            .filter(|(_, p)| !p.modules.launch_clamp)
            .map(|(id, p)| (id, Node::new(id, p, &vessel.resources, vessel.forward)))
            .collect();

        for (id, part) in vessel.parts.iter() {
            let (Some(line), Some(parent)) = (part.modules.fuel_line, part.parent) else {
                continue;
            };
            if let Some(target) = nodes.get_mut(line.target) {
                trace!(?id, ?parent, target = ?line.target, "fuel line");
                target.linked_parts.push(parent);
            }
        }

        Ok(Self { vessel, nodes })
    }

    pub fn vessel(&self) -> &'a VesselSnapshot {
        self.vessel
    }

    pub fn library(&self) -> &'a ResourceLibrary {
        &self.vessel.resources
    }

    pub fn part(&self, id: PartId) -> &'a Part {
        &self.vessel.parts[id]
    }

    pub fn contains(&self, id: PartId) -> bool {
        self.nodes.contains(id)
    }

    pub fn node(&self, id: PartId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: PartId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (PartId, &Node)> {
        self.nodes.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = PartId> + '_ {
        self.nodes.ids()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total mass of the remaining parts (kg).
    pub fn mass(&self) -> f64 {
        self.nodes.values().map(Node::mass).sum()
    }

    /// Total remaining propellant mass (kg).
    pub fn resource_mass(&self) -> f64 {
        self.nodes
            .values()
            .flat_map(Node::resources)
            .map(|(_, m)| m)
            .sum()
    }

    /// Mass-weighted drag coefficient of the remaining parts.
    pub fn drag_coefficient(&self) -> f64 {
        let (weighted, mass) = self
            .nodes
            .iter()
            .map(|(id, node)| (node.mass(), self.part(id).max_drag))
            .fold((0.0, 0.0), |(w, t), (m, cx)| (w + m * cx, t + m));
        if mass > 0.0 {
            weighted / mass
        } else {
            0.0
        }
    }

    /// Moves a pending flow map onto the nodes.
    pub fn commit_flows(&mut self, pending: FlowMap) {
        for (part, res, rate) in pending {
            if let Some(node) = self.nodes.get_mut(part) {
                node.add_flow(res, rate);
            }
        }
    }

    /// Time until the next resource in the graph runs out.
    pub fn next_event(&self) -> f64 {
        self.nodes
            .values()
            .map(|node| OrderedFloat(node.next_event()))
            .min()
            .map_or(f64::INFINITY, |t| t.0)
    }

    /// Burns every node for `dt` seconds. Returns whether anything ran out.
    pub fn burn(&mut self, dt: f64) -> bool {
        let mut depleted = false;
        for (_, node) in self.nodes.iter_mut() {
            depleted |= node.apply_fuel_consumption(dt);
        }
        depleted
    }

    /// Does anything at or below `id` still hold fuel that keeps a decoupler
    /// attached? Separatrons don't count.
    pub fn has_fuel_in_children(&self, id: PartId, visited: &mut BTreeSet<PartId>) -> bool {
        if !visited.insert(id) {
            return false;
        }
        let Some(node) = self.nodes.get(id) else {
            return false;
        };
        let library = self.library();

        if !node.is_sepratron
            && node
                .resources()
                .any(|(res, m)| library.flow_mode(res).holds_decoupler() && m > RESIDUAL_FUEL)
        {
            return true;
        }

        self.part(id)
            .children
            .iter()
            .filter(|c| self.contains(**c))
            .any(|c| self.has_fuel_in_children(*c, visited))
    }

    /// Parts with a staging icon that leave together with `id`.
    pub fn relevant_children_on_decouple(&self, id: PartId) -> Vec<PartId> {
        let mut relevant = vec![];
        let mut visited = BTreeSet::new();
        let mut worklist = vec![id];
        while let Some(current) = worklist.pop() {
            if !self.contains(current) || !visited.insert(current) {
                continue;
            }
            let part = self.part(current);
            if part.has_staging_icon {
                relevant.push(current);
            }
            worklist.extend(part.children.iter().rev().copied());
        }
        relevant
    }

    /// Removes `id` and everything below it from the graph.
    pub fn drop_part_and_children(&mut self, id: PartId) -> Vec<PartId> {
        let mut dropped = vec![];
        let mut worklist = vec![id];
        while let Some(current) = worklist.pop() {
            if self.nodes.remove(current).is_none() {
                continue;
            }
            dropped.push(current);
            worklist.extend(self.part(current).children.iter().rev().copied());
        }
        trace!(?id, ?dropped, "decoupled");
        dropped
    }

    /// Would this engine fire if its stage were activated right now?
    pub fn is_active_engine(&self, id: PartId) -> bool {
        let Some(node) = self.nodes.get(id) else {
            return false;
        };
        let part = self.part(id);
        if !part.modules.is_engine() {
            return false;
        }
        if node.exhaust_hits.iter().any(|hit| self.contains(*hit)) {
            return false;
        }
        !part
            .attach_node("bottom")
            .and_then(|n| n.attached_part)
            .is_some_and(|below| self.contains(below))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vessel::EngineModule;

    fn tank(library: &ResourceLibrary, amount: f64) -> Part {
        let lf = library.id_by_name("LiquidFuel").unwrap();
        Part::new("tank").with_mass(0.1).with_resource(lf, amount)
    }

    #[test]
    fn burn_conserves_mass() {
        let mut vessel = VesselSnapshot::new("burn");
        let lf = vessel.resources.id_by_name("LiquidFuel").unwrap();
        let a = vessel.add_part(tank(&vessel.resources, 20.0));
        let b = vessel.add_part(tank(&vessel.resources, 40.0));
        vessel.attach_stack(a, b);

        let mut graph = VesselGraph::new(&vessel).unwrap();
        assert!((graph.mass() - (200.0 + 100.0 + 200.0)).abs() < 1e-9);

        let mut pending = FlowMap::new();
        pending.add(a, lf, 10.0);
        pending.add(b, lf, 4.0);
        graph.commit_flows(pending);
        assert!((graph.next_event() - 10.0).abs() < 1e-12);

        let before = graph.resource_mass();
        let depleted = graph.burn(3.0);
        let after = graph.resource_mass();
        assert!(!depleted);
        assert!((before - after - 14.0 * 3.0).abs() < 1e-9);
        assert_eq!(graph.node(a).unwrap().flow(lf), 0.0);

        graph.commit_flows([(a, lf, 10.0)].into_iter().collect());
        assert!(graph.burn(100.0));
        assert_eq!(graph.node(a).unwrap().resource_mass(lf), Some(0.0));
        assert_eq!(graph.node(a).unwrap().next_event(), f64::INFINITY);
    }

    #[test]
    fn disabled_resources_are_dead_mass() {
        let mut vessel = VesselSnapshot::new("disabled");
        let lf = vessel.resources.id_by_name("LiquidFuel").unwrap();
        let mut part = tank(&vessel.resources, 20.0);
        part.resources.get_mut(&lf).unwrap().enabled = false;
        let id = vessel.add_part(part);

        let graph = VesselGraph::new(&vessel).unwrap();
        let node = graph.node(id).unwrap();
        assert_eq!(node.resource_mass(lf), Some(0.0));
        assert!((node.mass() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn engine_below_a_part_is_inactive() {
        let mut vessel = VesselSnapshot::new("shadowed");
        let upper = vessel.add_part(Part::new("upper").with_engine(EngineModule::default()));
        let lower = vessel.add_part(Part::new("lower").with_engine(EngineModule::default()));
        vessel.attach_stack(upper, lower);

        let mut graph = VesselGraph::new(&vessel).unwrap();
        assert!(!graph.is_active_engine(upper));
        assert!(graph.is_active_engine(lower));

        assert_eq!(graph.drop_part_and_children(lower), vec![lower]);
        assert!(graph.is_active_engine(upper));
    }

    #[test]
    fn sideways_engines_are_sepratrons() {
        let mut vessel = VesselSnapshot::new("sepratron");
        let engine = EngineModule {
            thrust_directions: vec![Vector3::x()],
            ..EngineModule::default()
        };
        let sep = vessel.add_part(Part::new("sep").with_engine(engine));
        let main = vessel.add_part(Part::new("main").with_engine(EngineModule::default()));
        vessel.attach_surface(main, sep);

        let graph = VesselGraph::new(&vessel).unwrap();
        assert!(graph.node(sep).unwrap().is_sepratron);
        assert!(!graph.node(main).unwrap().is_sepratron);
    }

    #[test]
    fn decouple_collects_staging_icons() {
        let mut vessel = VesselSnapshot::new("decouple");
        let top = vessel.add_part(tank(&vessel.resources, 10.0));
        let decoupler = vessel.add_part(Part::new("decoupler").with_decoupler());
        let lower = vessel.add_part(tank(&vessel.resources, 10.0));
        let engine = vessel.add_part(Part::new("engine").with_engine(EngineModule::default()));
        vessel.attach_stack(top, decoupler);
        vessel.attach_stack(decoupler, lower);
        vessel.attach_stack(lower, engine);

        let mut graph = VesselGraph::new(&vessel).unwrap();
        assert!(graph.has_fuel_in_children(decoupler, &mut BTreeSet::new()));
        assert_eq!(
            graph.relevant_children_on_decouple(decoupler),
            vec![decoupler, engine]
        );

        let dropped = graph.drop_part_and_children(decoupler);
        assert_eq!(dropped, vec![decoupler, lower, engine]);
        assert_eq!(graph.ids().collect::<Vec<_>>(), vec![top]);
    }
}

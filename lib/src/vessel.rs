//! The part-tree snapshot a staging run works from.
use std::collections::{BTreeMap, BTreeSet};

use color_eyre::eyre::{self, bail, OptionExt};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::{
    arena::{Arena, IdLike},
    math::FloatCurve,
    resource::{ResourceId, ResourceLibrary},
    staging::StagingResult,
};

#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct PartId(u32);

impl IdLike for PartId {
    fn from_raw(index: usize) -> Self {
        Self(index as u32)
    }

    fn into_raw(self) -> usize {
        self.0 as usize
    }
}

/// How a part is attached to its parent.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attachment {
    /// Surface-attached.
    Radial,
    /// Stack-attached through a node.
    Axial,
    #[default]
    None,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachNodeType {
    #[default]
    Stack,
    Surface,
    Dock,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttachNode {
    pub id: String,
    #[serde(default)]
    pub node_type: AttachNodeType,
    #[serde(default)]
    pub attached_part: Option<PartId>,
}

/// A resource stored in a part.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PartResource {
    /// How much of this resource is stored?
    pub amount: f64,
    /// The maximum amount of this resource that this part can hold.
    #[serde(default)]
    pub max_amount: f64,
    /// Is this resource enabled? Disabled resources count as dead mass.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A propellant consumed by an engine.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Propellant {
    pub id: ResourceId,
    /// Mixture ratio.
    pub ratio: f64,
}

/// Static engine data, as read from the host's engine module.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineModule {
    /// Maximum thrust (kN)
    pub max_thrust: f64,
    /// Minimum thrust (kN)
    pub min_thrust: f64,
    /// Fuel flow at full throttle (t/s). Derived from `max_thrust` and the
    /// vacuum ISP when zero.
    pub max_fuel_flow: f64,
    /// Fuel flow at zero throttle (t/s)
    pub min_fuel_flow: f64,
    /// Thrust limiter, in percent.
    pub thrust_percentage: f64,
    pub throttle_locked: bool,
    /// Specific impulse (s) against static pressure (atm).
    pub atmosphere_curve: FloatCurve,
    pub atm_change_flow: bool,
    pub use_atm_curve: bool,
    pub atm_curve: FloatCurve,
    pub use_vel_curve: bool,
    pub vel_curve: FloatCurve,
    pub use_atm_curve_isp: bool,
    pub atm_curve_isp: FloatCurve,
    pub use_vel_curve_isp: bool,
    pub vel_curve_isp: FloatCurve,
    /// Minimum flow multiplier.
    pub clamp: f64,
    pub flow_mult_cap: f64,
    pub flow_mult_cap_sharpness: f64,
    pub propellants: Vec<Propellant>,
    /// Thrust force directions of each thrust transform, in the same frame
    /// as [`VesselSnapshot::forward`].
    pub thrust_directions: Vec<Vector3<f64>>,
    /// Parts hit by the exhaust raycast of this engine.
    pub exhaust_hits: Vec<PartId>,
}

impl Default for EngineModule {
    fn default() -> Self {
        Self {
            max_thrust: 0.0,
            min_thrust: 0.0,
            max_fuel_flow: 0.0,
            min_fuel_flow: 0.0,
            thrust_percentage: 100.0,
            throttle_locked: false,
            atmosphere_curve: FloatCurve::new(),
            atm_change_flow: false,
            use_atm_curve: false,
            atm_curve: FloatCurve::new(),
            use_vel_curve: false,
            vel_curve: FloatCurve::new(),
            use_atm_curve_isp: false,
            atm_curve_isp: FloatCurve::new(),
            use_vel_curve_isp: false,
            vel_curve_isp: FloatCurve::new(),
            clamp: 0.0,
            flow_mult_cap: f64::MAX,
            flow_mult_cap_sharpness: 2.0,
            propellants: vec![],
            thrust_directions: vec![Vector3::y()],
            exhaust_hits: vec![],
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuelLine {
    pub target: PartId,
}

/// Capabilities of a part, resolved once from its modules.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub engines: Vec<EngineModule>,
    /// Stack or radial decoupler.
    pub decoupler: bool,
    pub launch_clamp: bool,
    pub fairing: bool,
    pub parachute: bool,
    pub fuel_line: Option<FuelLine>,
}

impl Capabilities {
    pub fn is_engine(&self) -> bool {
        !self.engines.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub name: String,
    #[serde(default)]
    pub parent: Option<PartId>,
    #[serde(default)]
    pub children: Vec<PartId>,
    #[serde(default)]
    pub attachment: Attachment,
    #[serde(default)]
    pub attach_nodes: Vec<AttachNode>,
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, PartResource>,
    /// Dry mass (t)
    #[serde(default)]
    pub mass: f64,
    #[serde(default = "default_true")]
    pub physically_significant: bool,
    #[serde(default = "default_max_drag")]
    pub max_drag: f64,
    #[serde(default = "default_true")]
    pub fuel_cross_feed: bool,
    #[serde(default)]
    pub no_cross_feed_node_key: String,
    #[serde(default)]
    pub has_staging_icon: bool,
    #[serde(default)]
    pub modules: Capabilities,
    /// Stage index written back after a staging run; -1 when unstaged.
    #[serde(default = "default_inverse_stage")]
    pub inverse_stage: i32,
}

fn default_true() -> bool {
    true
}

fn default_max_drag() -> f64 {
    0.2
}

fn default_forward() -> Vector3<f64> {
    Vector3::y()
}

fn default_inverse_stage() -> i32 {
    -1
}

impl Part {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            children: vec![],
            attachment: Attachment::None,
            attach_nodes: vec![],
            resources: BTreeMap::new(),
            mass: 0.0,
            physically_significant: true,
            max_drag: default_max_drag(),
            fuel_cross_feed: true,
            no_cross_feed_node_key: String::new(),
            has_staging_icon: false,
            modules: Capabilities::default(),
            inverse_stage: -1,
        }
    }

    pub fn with_mass(mut self, mass: f64) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_resource(mut self, id: ResourceId, amount: f64) -> Self {
        self.resources.insert(
            id,
            PartResource {
                amount,
                max_amount: amount,
                enabled: true,
            },
        );
        self
    }

    pub fn with_engine(mut self, engine: EngineModule) -> Self {
        self.modules.engines.push(engine);
        self.has_staging_icon = true;
        self
    }

    pub fn with_decoupler(mut self) -> Self {
        self.modules.decoupler = true;
        self.fuel_cross_feed = false;
        self.has_staging_icon = true;
        self
    }

    pub fn attach_node(&self, id: &str) -> Option<&AttachNode> {
        self.attach_nodes.iter().find(|n| n.id == id)
    }

    fn set_attach_node(&mut self, id: &str, node_type: AttachNodeType, part: PartId) {
        if let Some(node) = self.attach_nodes.iter_mut().find(|n| n.id == id) {
            node.attached_part = Some(part);
        } else {
            self.attach_nodes.push(AttachNode {
                id: id.to_owned(),
                node_type,
                attached_part: Some(part),
            });
        }
    }
}

/// A vessel as handed over by the host: its parts, the resource library
/// they refer to and the direction the vessel flies towards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VesselSnapshot {
    #[serde(default)]
    pub name: String,
    pub parts: Arena<PartId, Part>,
    #[serde(default = "ResourceLibrary::stock")]
    pub resources: ResourceLibrary,
    #[serde(default = "default_forward")]
    pub forward: Vector3<f64>,
}

impl Default for VesselSnapshot {
    fn default() -> Self {
        Self {
            name: String::new(),
            parts: Arena::new(),
            resources: ResourceLibrary::stock(),
            forward: Vector3::y(),
        }
    }
}

impl VesselSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_part(&mut self, part: Part) -> PartId {
        self.parts.push(part)
    }

    pub fn root(&self) -> Option<PartId> {
        self.parts
            .iter()
            .find(|(_, p)| p.parent.is_none())
            .map(|(id, _)| id)
    }

    /// Stacks `child` under `parent` through `parent_node` / `child_node`.
    pub fn attach_stack_at(
        &mut self,
        parent: PartId,
        parent_node: &str,
        child: PartId,
        child_node: &str,
    ) {
        self.parts[parent].children.push(child);
        self.parts[parent].set_attach_node(parent_node, AttachNodeType::Stack, child);
        let part = &mut self.parts[child];
        part.parent = Some(parent);
        part.attachment = Attachment::Axial;
        part.set_attach_node(child_node, AttachNodeType::Stack, parent);
    }

    /// Stacks `child` directly below `parent`.
    pub fn attach_stack(&mut self, parent: PartId, child: PartId) {
        self.attach_stack_at(parent, "bottom", child, "top");
    }

    /// Surface-attaches `child` to `parent`.
    pub fn attach_surface(&mut self, parent: PartId, child: PartId) {
        self.parts[parent].children.push(child);
        let part = &mut self.parts[child];
        part.parent = Some(parent);
        part.attachment = Attachment::Radial;
        part.set_attach_node("srfAttach", AttachNodeType::Surface, parent);
    }

    /// Adds a fuel line part on `source`, feeding `target`.
    pub fn add_fuel_line(&mut self, source: PartId, target: PartId) -> PartId {
        let mut line = Part::new("fuelLine");
        line.modules.fuel_line = Some(FuelLine { target });
        let id = self.add_part(line);
        self.attach_surface(source, id);
        id
    }

    /// Checks that every id referenced by the snapshot exists.
    pub fn validate(&self) -> eyre::Result<()> {
        let known = |id: PartId| self.parts.contains(id);
        let mut roots = BTreeSet::new();

        for (id, part) in self.parts.iter() {
            match part.parent {
                Some(parent) if !known(parent) => {
                    bail!("part {id:?} ({}) has unknown parent {parent:?}", part.name)
                }
                Some(_) => {}
                None => {
                    roots.insert(id);
                }
            }
            if let Some(child) = part.children.iter().find(|c| !known(**c)) {
                bail!("part {id:?} ({}) has unknown child {child:?}", part.name);
            }
            if let Some(node) = part
                .attach_nodes
                .iter()
                .find(|n| n.attached_part.is_some_and(|p| !known(p)))
            {
                bail!(
                    "attach node {} of part {id:?} ({}) points to an unknown part",
                    node.id,
                    part.name
                );
            }
            if let Some(line) = part.modules.fuel_line {
                if !known(line.target) {
                    bail!("fuel line {id:?} targets unknown part {:?}", line.target);
                }
                part.parent
                    .ok_or_eyre(format!("fuel line {id:?} is not attached to anything"))?;
            }
            for resource in part.resources.keys() {
                if !self.resources.contains(*resource) {
                    bail!("part {id:?} ({}) stores unknown resource {resource:?}", part.name);
                }
            }
            for engine in &part.modules.engines {
                if let Some(prop) = engine
                    .propellants
                    .iter()
                    .find(|p| !self.resources.contains(p.id))
                {
                    bail!("engine on part {id:?} ({}) burns unknown resource {:?}", part.name, prop.id);
                }
                if let Some(hit) = engine.exhaust_hits.iter().find(|h| !known(**h)) {
                    bail!("engine on part {id:?} ({}) hits unknown part {hit:?}", part.name);
                }
            }
        }

        if !self.parts.is_empty() && roots.is_empty() {
            bail!("vessel has no root part");
        }

        Ok(())
    }

    /// Writes the stage indices of a staging run back into the parts.
    pub fn apply_staging(&mut self, result: &StagingResult) {
        for (id, part) in self.parts.iter_mut() {
            part.inverse_stage = result
                .stage_index(id)
                .map_or(-1, |index| index as i32);
        }
    }
}

#[test]
fn validate_rejects_dangling_ids() {
    let mut vessel = VesselSnapshot::new("broken");
    let a = vessel.add_part(Part::new("a"));
    vessel.parts[a].children.push(PartId(9));
    assert!(vessel.validate().is_err());

    vessel.parts[a].children.clear();
    assert!(vessel.validate().is_ok());

    let b = vessel.add_part(Part::new("b"));
    vessel.attach_stack(a, b);
    vessel.parts[b].resources.insert(
        ResourceId(7),
        PartResource {
            amount: 1.0,
            max_amount: 1.0,
            enabled: true,
        },
    );
    assert!(vessel.validate().is_err());
}

#[test]
fn stack_attachment_links_both_nodes() {
    let mut vessel = VesselSnapshot::new("stack");
    let top = vessel.add_part(Part::new("top"));
    let bottom = vessel.add_part(Part::new("bottom"));
    vessel.attach_stack(top, bottom);

    assert_eq!(vessel.parts[top].children, vec![bottom]);
    assert_eq!(vessel.parts[bottom].parent, Some(top));
    assert_eq!(
        vessel.parts[top].attach_node("bottom").unwrap().attached_part,
        Some(bottom)
    );
    assert_eq!(
        vessel.parts[bottom].attach_node("top").unwrap().attached_part,
        Some(top)
    );
    assert_eq!(vessel.root(), Some(top));
}

//! Resource definitions shared by every part of a vessel.

use std::{collections::BTreeMap, sync::Arc};

use num_enum::{FromPrimitive, IntoPrimitive};
use serde::{Deserialize, Serialize};

use crate::arena::IdLike;

#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct ResourceId(pub i32);

impl IdLike for ResourceId {
    fn from_raw(index: usize) -> Self {
        Self(index as i32)
    }

    fn into_raw(self) -> usize {
        self.0 as usize
    }
}

/// Where a resource is allowed to flow from.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, FromPrimitive, IntoPrimitive,
)]
#[repr(i32)]
pub enum FlowMode {
    NoFlow = 0,
    AllVessel = 1,
    StagePriorityFlow = 2,
    StackPrioritySearch = 3,
    AllVesselBalance = 4,
    StagePriorityFlowBalance = 5,
    StageStackFlow = 6,
    StageStackFlowBalance = 7,
    #[default]
    Null = 8,
}

impl FlowMode {
    /// Resources in these modes keep a decoupler attached while any of
    /// them is left below it.
    pub fn holds_decoupler(self) -> bool {
        matches!(self, Self::NoFlow | Self::StackPrioritySearch)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ResourceDefinition {
    pub name: Arc<str>,
    /// Density of the resource, in tons per unit.
    pub density: f64,
    pub flow_mode: FlowMode,
}

/// The host's resource library, keyed by resource id.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ResourceLibrary {
    definitions: BTreeMap<ResourceId, ResourceDefinition>,
}

impl ResourceLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ResourceId, definition: ResourceDefinition) {
        self.definitions.insert(id, definition);
    }

    pub fn get(&self, id: ResourceId) -> Option<&ResourceDefinition> {
        self.definitions.get(&id)
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.definitions.contains_key(&id)
    }

    /// Flow mode of `id`. Unknown resources behave like [`FlowMode::Null`].
    pub fn flow_mode(&self, id: ResourceId) -> FlowMode {
        self.get(id).map_or(FlowMode::Null, |d| d.flow_mode)
    }

    pub fn id_by_name(&self, name: &str) -> Option<ResourceId> {
        self.definitions
            .iter()
            .find(|(_, d)| &*d.name == name)
            .map(|(id, _)| *id)
    }

    /// The stock resources a typical vessel carries.
    pub fn stock() -> Self {
        let mut library = Self::new();
        for (id, name, density, flow_mode) in [
            (-1_483_389_306, "LiquidFuel", 0.005, FlowMode::StackPrioritySearch),
            (-1_154_601_244, "Oxidizer", 0.005, FlowMode::StackPrioritySearch),
            (-1_004_587_290, "SolidFuel", 0.0075, FlowMode::NoFlow),
            (-929_029_996, "MonoPropellant", 0.004, FlowMode::AllVessel),
            (1_566_956_177, "ElectricCharge", 0.0, FlowMode::AllVessel),
            (1_434_315_826, "IntakeAir", 0.005, FlowMode::AllVessel),
            (-1_909_417_378, "XenonGas", 0.0001, FlowMode::AllVessel),
        ] {
            library.insert(
                ResourceId(id),
                ResourceDefinition {
                    name: name.into(),
                    density,
                    flow_mode,
                },
            );
        }
        library
    }
}

#[test]
fn stock_library_resolves_names() {
    let library = ResourceLibrary::stock();
    let solid = library.id_by_name("SolidFuel").unwrap();
    assert_eq!(library.flow_mode(solid), FlowMode::NoFlow);
    assert!(library.flow_mode(solid).holds_decoupler());
    assert_eq!(library.flow_mode(ResourceId(42)), FlowMode::Null);
    assert_eq!(FlowMode::from(3), FlowMode::StackPrioritySearch);
}

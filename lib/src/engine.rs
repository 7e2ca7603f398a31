//! Engine thrust and propellant draw.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    flow::{get_tanks, FlowMap},
    graph::VesselGraph,
    math::lerp,
    resource::{ResourceId, ResourceLibrary},
    vessel::{EngineModule, PartId},
};

/// Standard gravity (`m/s^2`)
pub const G0: f64 = 9.80665;

/// Ambient conditions an engine runs in.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    /// Static pressure (`atm`)
    pub atm_pressure: f64,
    /// Atmospheric density (`kg/m^3`)
    pub atm_density: f64,
    pub mach_number: f64,
    /// Main throttle in `[0, 1]`
    pub main_throttle: f64,
}

impl Conditions {
    pub fn vacuum(main_throttle: f64) -> Self {
        Self {
            main_throttle,
            ..Self::default()
        }
    }

    /// Fixed ambient values of the simple (non-ascent) simulation: vacuum
    /// isp, unit density and Mach, full throttle.
    pub fn constant_ambient() -> Self {
        Self {
            atm_pressure: 0.0,
            atm_density: 1.0,
            mach_number: 1.0,
            main_throttle: 1.0,
        }
    }

    pub fn with_throttle(self, main_throttle: f64) -> Self {
        Self {
            main_throttle,
            ..self
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
struct Feed {
    id: ResourceId,
    ratio: f64,
    tanks: Vec<PartId>,
}

/// An active engine and the tanks currently feeding it.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineModel<'a> {
    pub part: PartId,
    module: &'a EngineModule,
    feeds: Vec<Feed>,
}

impl<'a> EngineModel<'a> {
    pub fn new(part: PartId, module: &'a EngineModule, library: &ResourceLibrary) -> Self {
        let feeds = module
            .propellants
            .iter()
            .filter_map(|p| {
                let def = library.get(p.id)?;
                (def.density > 0.0 && &*def.name != "IntakeAir").then(|| Feed {
                    id: p.id,
                    ratio: p.ratio,
                    tanks: vec![],
                })
            })
            .collect();

        Self {
            part,
            module,
            feeds,
        }
    }

    /// Re-resolves the tanks feeding every propellant.
    pub fn update_tanks(&mut self, graph: &VesselGraph<'_>) {
        for feed in &mut self.feeds {
            feed.tanks = get_tanks(graph, feed.id, self.part, &mut BTreeSet::new());
        }
        trace!(
            part = ?self.part,
            tanks = ?self.feeds.iter().map(|f| &f.tanks).collect::<Vec<_>>(),
            "engine tanks"
        );
    }

    pub fn tanks(&self, res: ResourceId) -> &[PartId] {
        self.feeds
            .iter()
            .find(|f| f.id == res)
            .map(|f| f.tanks.as_slice())
            .unwrap_or_default()
    }

    /// Does any propellant lack a tank?
    pub fn is_starved(&self) -> bool {
        self.feeds.iter().any(|f| f.tanks.is_empty())
    }

    pub fn flow_multiplier(&self, conditions: Conditions) -> f64 {
        let m = self.module;
        let mut flow_multiplier = 1.0;

        if m.atm_change_flow {
            flow_multiplier = if m.use_atm_curve {
                m.atm_curve.evaluate(conditions.atm_density * 40.0 / 49.0)
            } else {
                conditions.atm_density * 40.0 / 49.0
            };
        }

        if m.use_vel_curve {
            flow_multiplier *= m.vel_curve.evaluate(conditions.mach_number);
        }

        if flow_multiplier > m.flow_mult_cap {
            let excess = flow_multiplier - m.flow_mult_cap;
            flow_multiplier =
                m.flow_mult_cap + excess / (m.flow_mult_cap_sharpness + excess / m.flow_mult_cap);
        }

        if flow_multiplier < m.clamp && m.clamp < 1.0 {
            flow_multiplier = m.clamp;
        }

        flow_multiplier
    }

    /// Specific impulse (s).
    pub fn isp(&self, conditions: Conditions) -> f64 {
        let m = self.module;
        let mut isp = m.atmosphere_curve.evaluate(conditions.atm_pressure);
        if m.use_atm_curve_isp {
            isp *= m.atm_curve_isp.evaluate(conditions.atm_density * 40.0 / 49.0);
        }
        if m.use_vel_curve_isp {
            isp *= m.vel_curve_isp.evaluate(conditions.mach_number);
        }
        isp
    }

    /// Engine mass flow (kg/s), ignoring whether it has any fuel.
    pub fn mass_flow(&self, conditions: Conditions) -> f64 {
        let m = self.module;
        let vacuum_isp = m.atmosphere_curve.evaluate(0.0);
        let derive = |flow: f64, thrust: f64| {
            if flow == 0.0 && thrust > 0.0 && vacuum_isp > 0.0 {
                thrust * 1000.0 / (vacuum_isp * G0)
            } else {
                flow * 1000.0
            }
        };
        let min_fuel_flow = derive(m.min_fuel_flow, m.min_thrust);
        let max_fuel_flow = derive(m.max_fuel_flow, m.max_thrust);

        let throttle = if m.throttle_locked {
            1.0
        } else {
            conditions.main_throttle
        };

        lerp(
            min_fuel_flow,
            max_fuel_flow,
            throttle * m.thrust_percentage / 100.0,
        ) * self.flow_multiplier(conditions)
    }

    /// Propellant drawn (kg/s) at `conditions`. With a pending map, the
    /// draw is split between propellants by mixture ratio, then evenly
    /// across each propellant's tanks, and recorded there.
    pub fn evaluate_fuel_flow(&self, conditions: Conditions, pending: Option<&mut FlowMap>) -> f64 {
        if self.is_starved() {
            return 0.0;
        }
        let mass_flow = self.mass_flow(conditions);

        let ratio_sum: f64 = self.feeds.iter().map(|f| f.ratio).sum();
        if ratio_sum <= 0.0 {
            return mass_flow;
        }

        if let Some(pending) = pending {
            for feed in &self.feeds {
                let per_tank = mass_flow * feed.ratio / (ratio_sum * feed.tanks.len() as f64);
                for tank in &feed.tanks {
                    pending.add(*tank, feed.id, per_tank);
                }
            }
        }
        mass_flow
    }

    /// Thrust (N) at `conditions`.
    pub fn thrust(&self, conditions: Conditions) -> f64 {
        if self.is_starved() {
            return 0.0;
        }
        self.mass_flow(conditions) * self.isp(conditions) * G0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        math::FloatCurve,
        vessel::{Part, Propellant, VesselSnapshot},
    };

    fn rocket(engine: EngineModule) -> (VesselSnapshot, PartId, PartId) {
        let mut vessel = VesselSnapshot::new("engine");
        let lf = vessel.resources.id_by_name("LiquidFuel").unwrap();
        let ox = vessel.resources.id_by_name("Oxidizer").unwrap();
        let tank = vessel.add_part(
            Part::new("tank")
                .with_resource(lf, 90.0)
                .with_resource(ox, 110.0),
        );
        let engine = vessel.add_part(Part::new("engine").with_engine(engine));
        vessel.attach_stack(tank, engine);
        (vessel, tank, engine)
    }

    fn bipropellant(library: &ResourceLibrary) -> EngineModule {
        let lf = library.id_by_name("LiquidFuel").unwrap();
        let ox = library.id_by_name("Oxidizer").unwrap();
        EngineModule {
            max_thrust: 215.0,
            max_fuel_flow: 0.0,
            atmosphere_curve: [(0.0, 320.0), (1.0, 250.0)].into_iter().collect(),
            propellants: vec![
                Propellant {
                    id: lf,
                    ratio: 0.9,
                },
                Propellant {
                    id: ox,
                    ratio: 1.1,
                },
            ],
            ..EngineModule::default()
        }
    }

    #[test]
    fn flow_derived_from_thrust() {
        let library = ResourceLibrary::stock();
        let (vessel, tank, engine) = rocket(bipropellant(&library));
        let graph = VesselGraph::new(&vessel).unwrap();
        let part = &vessel.parts[engine];
        let mut model = EngineModel::new(engine, &part.modules.engines[0], &vessel.resources);
        assert!(model.is_starved());
        assert_eq!(model.evaluate_fuel_flow(Conditions::vacuum(1.0), None), 0.0);

        model.update_tanks(&graph);
        let lf = library.id_by_name("LiquidFuel").unwrap();
        assert_eq!(model.tanks(lf), &[tank]);

        let expected = 215_000.0 / (320.0 * G0);
        let mut pending = FlowMap::new();
        let flow = model.evaluate_fuel_flow(Conditions::vacuum(1.0), Some(&mut pending));
        assert!((flow - expected).abs() < 1e-9);
        assert!((pending.total() - expected).abs() < 1e-9);
        assert!((pending.get(tank, lf) - expected * 0.45).abs() < 1e-9);
        assert!((model.thrust(Conditions::vacuum(1.0)) - 215_000.0).abs() < 1e-6);

        let sea_level = Conditions {
            atm_pressure: 1.0,
            ..Conditions::vacuum(1.0)
        };
        assert!((model.thrust(sea_level) - 215_000.0 * 250.0 / 320.0).abs() < 1e-6);
    }

    #[test]
    fn throttle_and_limiter_scale_flow() {
        let library = ResourceLibrary::stock();
        let mut module = bipropellant(&library);
        module.max_fuel_flow = 0.01;
        module.thrust_percentage = 50.0;
        let (vessel, _, engine) = rocket(module);
        let graph = VesselGraph::new(&vessel).unwrap();
        let mut model = EngineModel::new(engine, &vessel.parts[engine].modules.engines[0], &vessel.resources);
        model.update_tanks(&graph);

        assert!((model.evaluate_fuel_flow(Conditions::vacuum(1.0), None) - 5.0).abs() < 1e-12);
        assert!((model.evaluate_fuel_flow(Conditions::vacuum(0.5), None) - 2.5).abs() < 1e-12);
        assert_eq!(model.evaluate_fuel_flow(Conditions::vacuum(0.0), None), 0.0);
    }

    #[test]
    fn flow_multiplier_is_capped_and_clamped() {
        let library = ResourceLibrary::stock();
        let mut module = bipropellant(&library);
        module.atm_change_flow = true;
        module.flow_mult_cap = 1.0;
        module.flow_mult_cap_sharpness = 2.0;
        module.clamp = 0.2;
        module.use_vel_curve = true;
        module.vel_curve = FloatCurve::constant(1.0);
        let (vessel, _, engine) = rocket(module);
        let model = EngineModel::new(engine, &vessel.parts[engine].modules.engines[0], &vessel.resources);

        let dense = Conditions {
            atm_density: 4.9,
            ..Conditions::vacuum(1.0)
        };
        // 4.0 over a cap of 1.0 => 1 + 3 / (2 + 3)
        assert!((model.flow_multiplier(dense) - 1.6).abs() < 1e-12);
        assert!((model.flow_multiplier(Conditions::vacuum(1.0)) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn propellants_split_by_ratio() {
        let mut vessel = VesselSnapshot::new("mixed");
        let lf = vessel.resources.id_by_name("LiquidFuel").unwrap();
        let mono = vessel.resources.id_by_name("MonoPropellant").unwrap();
        let tank = vessel.add_part(
            Part::new("tank")
                .with_resource(lf, 100.0)
                .with_resource(mono, 100.0),
        );
        let engine = vessel.add_part(Part::new("engine").with_engine(EngineModule {
            max_fuel_flow: 0.01,
            atmosphere_curve: FloatCurve::constant(300.0),
            propellants: vec![
                Propellant {
                    id: lf,
                    ratio: 1.0,
                },
                Propellant {
                    id: mono,
                    ratio: 1.0,
                },
            ],
            ..EngineModule::default()
        }));
        vessel.attach_stack(tank, engine);
        let graph = VesselGraph::new(&vessel).unwrap();
        let mut model = EngineModel::new(engine, &vessel.parts[engine].modules.engines[0], &vessel.resources);
        model.update_tanks(&graph);

        let mut pending = FlowMap::new();
        let flow = model.evaluate_fuel_flow(Conditions::vacuum(1.0), Some(&mut pending));
        assert!((flow - 10.0).abs() < 1e-12);
        // Different densities, same share.
        assert!((pending.get(tank, lf) - 5.0).abs() < 1e-12);
        assert!((pending.get(tank, mono) - 5.0).abs() < 1e-12);
    }
}

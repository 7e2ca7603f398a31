//! Event-driven staging: burns propellant forward in time and groups parts
//! into stages as engines light up and decouplers fire.

use std::collections::{BTreeMap, BTreeSet};

use color_eyre::eyre;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{
    ascent::{AscentIntegrator, AscentParameters, AscentState},
    bodies::Body,
    engine::{Conditions, EngineModel},
    flow::FlowMap,
    graph::VesselGraph,
    vessel::{PartId, VesselSnapshot},
};

/// Smallest step the simulation takes between events (s).
const MIN_EVENT_STEP: f64 = 1e-100;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParameters {
    /// Run the ascent integrator instead of a vacuum burn.
    pub advanced: bool,
    /// Acceleration cap (`m/s^2`); zero for none.
    pub max_acceleration: f64,
    pub limit_to_terminal_velocity: bool,
    /// Launch altitude above the datum (m).
    pub departure_altitude: f64,
    /// Minimum time between recorded samples (s).
    pub sampling_interval: f64,
    pub max_iterations: usize,
    pub ascent: AscentParameters,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            advanced: false,
            max_acceleration: 0.0,
            limit_to_terminal_velocity: true,
            departure_altitude: 68.0,
            sampling_interval: 0.1,
            max_iterations: 200_000,
            ascent: AscentParameters::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageDescription {
    /// Mission time at which the stage fires (s).
    pub activation_time: f64,
    pub parts: Vec<PartId>,
}

/// One point of the simulated ascent.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// (s)
    pub time: f64,
    /// (kg)
    pub mass: f64,
    /// (m)
    pub altitude: f64,
    /// Surface velocity (m/s)
    pub velocity: f64,
    /// Thrust and drag acceleration (`m/s^2`)
    pub acceleration: f64,
    pub throttle: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StagingResult {
    /// Stages in the order they fire. The first one has the highest index.
    pub stages: Vec<StageDescription>,
    pub samples: Vec<Sample>,
    pub stage_indices: BTreeMap<PartId, u32>,
}

impl StagingResult {
    fn new(stages: Vec<StageDescription>, samples: Vec<Sample>) -> Self {
        let count = stages.len();
        let stage_indices = stages
            .iter()
            .enumerate()
            .flat_map(|(i, stage)| {
                let index = (count - 1 - i) as u32;
                stage.parts.iter().map(move |p| (*p, index))
            })
            .collect();
        Self {
            stages,
            samples,
            stage_indices,
        }
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage_index(&self, part: PartId) -> Option<u32> {
        self.stage_indices.get(&part).copied()
    }

    /// The stage with the given index.
    pub fn stage(&self, index: u32) -> Option<&StageDescription> {
        let i = self.stages.len().checked_sub(index as usize + 1)?;
        self.stages.get(i)
    }

    /// Stages paired with their index, lowest index first.
    pub fn by_index(&self) -> impl Iterator<Item = (u32, &StageDescription)> {
        let count = self.stages.len();
        self.stages
            .iter()
            .enumerate()
            .rev()
            .map(move |(i, stage)| ((count - 1 - i) as u32, stage))
    }
}

/// Computes the staging of `vessel` launched from `body`.
pub fn compute_stages(
    vessel: &VesselSnapshot,
    body: &Body,
    params: &SimulationParameters,
) -> eyre::Result<StagingResult> {
    Ok(StagingSimulator::new(vessel, body, params)?.run())
}

pub struct StagingSimulator<'a> {
    body: &'a Body,
    params: &'a SimulationParameters,
    graph: VesselGraph<'a>,
    engines: Vec<EngineModel<'a>>,
    staged: BTreeSet<PartId>,
    stages: Vec<StageDescription>,
    samples: Vec<Sample>,
    state: AscentState,
    elapsed: f64,
}

impl<'a> StagingSimulator<'a> {
    pub fn new(
        vessel: &'a VesselSnapshot,
        body: &'a Body,
        params: &'a SimulationParameters,
    ) -> eyre::Result<Self> {
        let graph = VesselGraph::new(vessel)?;
        let state = AscentState::on_pad(body, params.departure_altitude, graph.mass());

        let mut sim = Self {
            body,
            params,
            graph,
            engines: vec![],
            staged: BTreeSet::new(),
            stages: vec![],
            samples: vec![],
            state,
            elapsed: 0.0,
        };

        let clamps = vessel
            .parts
            .iter()
            .filter(|(_, p)| p.modules.launch_clamp)
            .map(|(id, _)| id);
        let first = clamps.chain(sim.update_engines()).collect::<Vec<_>>();
        sim.push_stage(first);

        Ok(sim)
    }

    /// Rebuilds the active engine set. Returns the engine parts now active.
    fn update_engines(&mut self) -> Vec<PartId> {
        let graph = &self.graph;
        let active = graph
            .nodes()
            .filter(|(id, node)| graph.is_active_engine(*id) && !node.is_sepratron)
            .map(|(id, _)| id)
            .collect::<Vec<_>>();

        self.engines = active
            .iter()
            .flat_map(|&id| {
                graph
                    .part(id)
                    .modules
                    .engines
                    .iter()
                    .map(move |module| EngineModel::new(id, module, graph.library()))
            })
            .collect();
        active
    }

    /// Appends a stage at the current time, skipping parts already staged.
    fn push_stage(&mut self, parts: impl IntoIterator<Item = PartId>) {
        let parts = parts
            .into_iter()
            .filter(|p| self.staged.insert(*p))
            .collect::<Vec<_>>();
        if parts.is_empty() {
            return;
        }
        debug!(time = self.elapsed, ?parts, "stage");
        self.stages.push(StageDescription {
            activation_time: self.elapsed,
            parts,
        });
    }

    fn conditions(&self) -> Conditions {
        if self.params.advanced {
            let integrator = AscentIntegrator::new(self.body, &self.engines, &self.params.ascent);
            integrator
                .conditions(&self.state)
                .with_throttle(self.state.throttle)
        } else {
            Conditions::constant_ambient()
        }
    }

    fn throttle(&self) -> f64 {
        if self.params.advanced {
            self.state.throttle
        } else {
            1.0
        }
    }

    pub fn run(mut self) -> StagingResult {
        let mut iterations = 0;
        while !self.graph.is_empty() {
            iterations += 1;
            if iterations > self.params.max_iterations {
                warn!(
                    iterations = self.params.max_iterations,
                    time = self.elapsed,
                    "staging simulation did not finish"
                );
                break;
            }

            if self.params.advanced {
                self.state.mass = self.graph.mass();
            }

            for engine in &mut self.engines {
                engine.update_tanks(&self.graph);
            }
            let conditions = self.conditions();
            let mut pending = FlowMap::new();
            for engine in &self.engines {
                engine.evaluate_fuel_flow(conditions, Some(&mut pending));
            }
            self.graph.commit_flows(pending);

            let mut step = self.graph.next_event().max(MIN_EVENT_STEP);
            let throttle = self.throttle();
            if step.is_infinite() && throttle > 0.0 {
                debug!(time = self.elapsed, "no further fuel consumption");
                break;
            }

            if self.params.advanced {
                step = self.advance(step);
            }

            trace!(time = self.elapsed, step, mass = self.graph.mass(), "burn");
            let depleted = self.graph.burn(step);
            self.elapsed += step;
            if !depleted {
                continue;
            }

            self.decouple();
            let active = self.update_engines();
            self.push_stage(active);
        }

        self.finish()
    }

    /// Integrates the ascent over at most `step`. Returns the time actually
    /// covered.
    fn advance(&mut self, step: f64) -> f64 {
        let cadence = self.params.sampling_interval;
        let mut step = step;
        if self.state.throttle == 0.0 {
            step = cadence;
        } else if step > cadence {
            let last_stage = self.stages.last().map_or(0.0, |s| s.activation_time);
            step = cadence.max((self.elapsed + step - last_stage) / 100.0);
        }

        let integrator = AscentIntegrator::new(self.body, &self.engines, &self.params.ascent)
            .max_acceleration(self.params.max_acceleration)
            .limit_to_terminal_velocity(self.params.limit_to_terminal_velocity)
            .drag_coefficient(self.graph.drag_coefficient());
        let accepted = integrator.step(&self.state, step);
        self.state = accepted.state;

        let time = self.elapsed + accepted.dt;
        if self
            .samples
            .last()
            .map_or(true, |last| last.time + cadence <= time)
        {
            self.samples.push(Sample {
                time,
                mass: self.state.mass,
                altitude: self.state.altitude(self.body),
                velocity: self.state.surface_velocity(self.body).norm(),
                acceleration: accepted.derivative.acceleration_no_gravity.norm(),
                throttle: self.state.throttle,
            });
        }
        accepted.dt
    }

    /// Fires every decoupler with nothing left to burn below it.
    fn decouple(&mut self) {
        let graph = &self.graph;
        let decouplers = graph
            .ids()
            .filter(|id| graph.part(*id).modules.decoupler)
            .filter(|id| !graph.has_fuel_in_children(*id, &mut BTreeSet::new()))
            .collect::<Vec<_>>();
        if decouplers.is_empty() {
            return;
        }

        let mut parts = decouplers.clone();
        for decoupler in decouplers {
            if !self.graph.contains(decoupler) {
                continue;
            }
            parts.extend(self.graph.relevant_children_on_decouple(decoupler));
            self.graph.drop_part_and_children(decoupler);
        }
        self.push_stage(parts.into_iter().unique());
    }

    fn finish(mut self) -> StagingResult {
        let leftover = self
            .graph
            .ids()
            .filter(|id| self.graph.part(*id).has_staging_icon)
            .collect::<Vec<_>>();
        self.push_stage(leftover);

        let graph = &self.graph;
        let stages = std::mem::take(&mut self.stages)
            .into_iter()
            .flat_map(|stage| {
                let activation_time = stage.activation_time;
                let (fairings, rest): (Vec<_>, Vec<_>) = stage
                    .parts
                    .into_iter()
                    .partition(|p| graph.part(*p).modules.fairing);
                [fairings, rest]
                    .into_iter()
                    .filter(|parts| !parts.is_empty())
                    .map(move |parts| StageDescription {
                        activation_time,
                        parts,
                    })
            })
            .collect::<Vec<_>>();

        debug!(
            stages = stages.len(),
            samples = self.samples.len(),
            time = self.elapsed,
            "staging finished"
        );
        StagingResult::new(stages, self.samples)
    }
}

#[test]
fn stage_indices_count_down() {
    let stages = vec![
        StageDescription {
            activation_time: 0.0,
            parts: vec![PartId::default()],
        },
        StageDescription {
            activation_time: 4.0,
            parts: vec![],
        },
    ];
    let result = StagingResult::new(stages, vec![]);
    assert_eq!(result.stage_index(PartId::default()), Some(1));
    assert_eq!(result.stage(0).unwrap().activation_time, 4.0);
    assert!(result.stage(2).is_none());
    assert_eq!(
        result.by_index().map(|(i, _)| i).collect::<Vec<_>>(),
        vec![0, 1]
    );
}

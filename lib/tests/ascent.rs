use smartstage::{
    ascent::{AscentIntegrator, AscentParameters, AscentState},
    bodies::Body,
    compute_stages,
    engine::EngineModel,
    graph::VesselGraph,
    math::FloatCurve,
    resource::ResourceLibrary,
    vessel::{EngineModule, Part, PartId, Propellant, VesselSnapshot},
    SimulationParameters,
};

/// 11.5 t rocket with a 230 kN, 300 s engine.
fn rocket() -> (VesselSnapshot, PartId) {
    let lf = ResourceLibrary::stock().id_by_name("LiquidFuel").unwrap();
    let mut vessel = VesselSnapshot::new("ascent");
    let tank = vessel.add_part(Part::new("tank").with_mass(1.0).with_resource(lf, 2000.0));
    let engine = vessel.add_part(
        Part::new("engine").with_mass(0.5).with_engine(EngineModule {
            max_thrust: 230.0,
            atmosphere_curve: FloatCurve::constant(300.0),
            propellants: vec![Propellant {
                id: lf,
                ratio: 1.0,
            }],
            ..EngineModule::default()
        }),
    );
    vessel.attach_stack(tank, engine);
    (vessel, engine)
}

fn engine_models<'a>(
    vessel: &'a VesselSnapshot,
    graph: &VesselGraph<'_>,
    part: PartId,
) -> Vec<EngineModel<'a>> {
    vessel.parts[part]
        .modules
        .engines
        .iter()
        .map(|module| {
            let mut model = EngineModel::new(part, module, &vessel.resources);
            model.update_tanks(graph);
            model
        })
        .collect()
}

#[test]
fn large_throttle_changes_shrink_the_step() {
    let (vessel, engine) = rocket();
    let graph = VesselGraph::new(&vessel).unwrap();
    let engines = engine_models(&vessel, &graph, engine);
    let mun = Body::mun();
    let params = AscentParameters::default();
    let integrator = AscentIntegrator::new(&mun, &engines, &params).max_acceleration(10.0);

    let state = AscentState::on_pad(&mun, 0.0, graph.mass());
    assert!((state.mass - 11_500.0).abs() < 1e-9);
    let (_, throttle) = integrator.derivative(&state);
    assert!((throttle - 0.5).abs() < 1e-9);

    // Holding 10 m/s^2 burns ~16% of the mass in 50 s, so the throttle
    // drops by more than the tolerance over the full step.
    let step = integrator.step(&state, 50.0);
    assert!(step.dt < 50.0);
    assert!(step.dt >= params.min_step);
    assert!((step.state.throttle - step.start_throttle).abs() <= params.throttle_tolerance);
    assert!(step.state.mass < state.mass);
    assert!(step.state.altitude(&mun) > 0.0);
}

#[test]
fn accepted_steps_respect_the_throttle_tolerance() {
    let (vessel, engine) = rocket();
    let graph = VesselGraph::new(&vessel).unwrap();
    let engines = engine_models(&vessel, &graph, engine);
    let kerbin = Body::kerbin();
    let params = AscentParameters::default();
    let integrator = AscentIntegrator::new(&kerbin, &engines, &params)
        .max_acceleration(15.0)
        .limit_to_terminal_velocity(true)
        .drag_coefficient(graph.drag_coefficient());

    let mut state = AscentState::on_pad(&kerbin, 68.0, graph.mass());
    let mut time = 0.0;
    while time < 60.0 {
        let step = integrator.step(&state, 5.0);
        let change = (step.state.throttle - step.start_throttle).abs();
        assert!(change <= params.throttle_tolerance || step.dt < 2.0 * params.min_step);
        assert!((0.0..=1.0).contains(&step.state.throttle));
        time += step.dt;
        state = step.state;
    }
    assert!(state.altitude(&kerbin) > 68.0);
}

#[test]
fn advanced_run_records_samples() {
    let (vessel, engine) = rocket();
    let params = SimulationParameters {
        advanced: true,
        max_acceleration: 20.0,
        ..SimulationParameters::default()
    };
    let result = compute_stages(&vessel, &Body::kerbin(), &params).unwrap();

    assert_eq!(result.stage_count(), 1);
    assert_eq!(result.stage(0).unwrap().parts, vec![engine]);

    let samples = &result.samples;
    assert!(!samples.is_empty());
    for pair in samples.windows(2) {
        assert!(pair[1].time >= pair[0].time + params.sampling_interval);
    }
    assert!(samples
        .iter()
        .all(|s| (0.0..=1.0).contains(&s.throttle) && s.mass > 0.0));

    let last = samples.last().unwrap();
    assert!(last.altitude > params.departure_altitude);
    assert!(last.mass < samples[0].mass);
}

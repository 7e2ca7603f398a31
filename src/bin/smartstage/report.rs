use std::path::Path;

use color_eyre::eyre::{self, WrapErr};
use itertools::Itertools;
use smartstage::{staging::StagingResult, vessel::VesselSnapshot};

/// Stage table, lowest index first.
pub fn stage_table(vessel: &VesselSnapshot, result: &StagingResult) -> String {
    let header = format!("{:>5}  {:>10}  parts", "stage", "time (s)");
    let rows = result.by_index().map(|(index, stage)| {
        let parts = stage
            .parts
            .iter()
            .map(|id| {
                vessel
                    .parts
                    .get(*id)
                    .map_or_else(|| format!("{id:?}"), |p| p.name.clone())
            })
            .join(", ");
        format!("{index:>5}  {:>10.2}  {parts}", stage.activation_time)
    });
    std::iter::once(header).chain(rows).map(|line| line + "\n").collect()
}

pub fn write_samples(path: &Path, result: &StagingResult) -> eyre::Result<()> {
    let mut writer =
        csv::Writer::from_path(path).wrap_err_with(|| format!("creating {}", path.display()))?;
    for sample in &result.samples {
        writer.serialize(sample)?;
    }
    writer.flush()?;
    Ok(())
}

#[test]
fn table_lists_stages_by_index() {
    use smartstage::{bodies::Body, compute_stages, vessel::Part, SimulationParameters};

    let mut vessel = VesselSnapshot::new("table");
    let decoupler = vessel.add_part(Part::new("decoupler").with_decoupler());
    let chute = vessel.add_part(Part::new("chute"));
    vessel.parts[chute].has_staging_icon = true;
    vessel.attach_stack(decoupler, chute);

    let result = compute_stages(&vessel, &Body::kerbin(), &SimulationParameters::default()).unwrap();
    let table = stage_table(&vessel, &result);
    let lines = table.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 1 + result.stage_count());
    assert!(lines[0].starts_with("stage"));
    assert!(table.ends_with('\n'));
    assert!(lines[1..].iter().any(|l| l.ends_with("decoupler, chute")));
}

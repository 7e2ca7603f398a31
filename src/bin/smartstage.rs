#![warn(clippy::unwrap_used)]
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{self, WrapErr};
use serde::de::DeserializeOwned;
use settings::Settings;
use smartstage::{bodies::SolarSystem, vessel::VesselSnapshot, SimulationParameters};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[path = "smartstage/report.rs"]
mod report;
#[path = "smartstage/settings.rs"]
mod settings;

#[derive(Parser, Debug)]
#[command(author, version, about = "Automatic staging for KSP vessels")]
struct Cli {
    /// Settings file
    #[arg(long, global = true, default_value = "settings.toml")]
    settings: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute the staging of a vessel snapshot
    Compute(ComputeArgs),
    /// Show or change the stored settings
    Settings(SettingsArgs),
}

#[derive(Args, Debug)]
struct ComputeArgs {
    /// Vessel snapshot (RON)
    vessel: PathBuf,

    /// Celestial bodies (RON); the stock bodies when omitted
    #[arg(long)]
    bodies: Option<PathBuf>,

    /// Body to launch from
    #[arg(long, default_value = "Kerbin")]
    planet: String,

    /// Simulate the ascent instead of a vacuum burn
    #[arg(long)]
    advanced: bool,

    /// Run the vacuum burn even when the settings enable the ascent
    #[arg(long, conflicts_with = "advanced")]
    simple: bool,

    /// Acceleration cap in m/s^2 (0 for none)
    #[arg(long, default_value_t = 0.0)]
    max_acceleration: f64,

    /// Don't throttle down near terminal velocity
    #[arg(long)]
    no_terminal_velocity: bool,

    /// Launch altitude in m
    #[arg(long)]
    departure_altitude: Option<f64>,

    /// Write ascent samples to this CSV file
    #[arg(long)]
    samples: Option<PathBuf>,

    /// Write the stage indices back into the vessel file
    #[arg(long)]
    write: bool,
}

#[derive(Args, Debug)]
struct SettingsArgs {
    #[arg(long)]
    auto_update_staging: Option<bool>,
    #[arg(long)]
    advanced: Option<bool>,
    #[arg(long)]
    limit_to_terminal_velocity: Option<bool>,
}

fn read_ron<T: DeserializeOwned>(path: &Path) -> eyre::Result<T> {
    let text =
        std::fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    ron::from_str(&text).wrap_err_with(|| format!("parsing {}", path.display()))
}

fn simulation_parameters(args: &ComputeArgs, settings: &Settings) -> SimulationParameters {
    let defaults = SimulationParameters::default();
    SimulationParameters {
        advanced: !args.simple && (args.advanced || settings.advanced_simulation),
        max_acceleration: args.max_acceleration,
        limit_to_terminal_velocity: settings.limit_to_terminal_velocity
            && !args.no_terminal_velocity,
        departure_altitude: args
            .departure_altitude
            .unwrap_or(defaults.departure_altitude),
        ..defaults
    }
}

fn compute(args: ComputeArgs, settings: &Settings) -> eyre::Result<()> {
    let mut vessel: VesselSnapshot = read_ron(&args.vessel)?;
    let system = match &args.bodies {
        Some(path) => read_ron::<SolarSystem>(path)?,
        None => SolarSystem::default(),
    };
    let body = system.body(&args.planet)?;

    let params = simulation_parameters(&args, settings);

    info!(vessel = %vessel.name, parts = vessel.parts.len(), body = %body.name, "computing stages");
    let result = smartstage::compute_stages(&vessel, &body, &params)?;
    print!("{}", report::stage_table(&vessel, &result));

    if let Some(path) = &args.samples {
        report::write_samples(path, &result)?;
        info!(samples = result.samples.len(), path = %path.display(), "wrote samples");
    }

    if args.write || settings.auto_update_staging {
        vessel.apply_staging(&result);
        let text = ron::ser::to_string_pretty(&vessel, ron::ser::PrettyConfig::default())?;
        std::fs::write(&args.vessel, text)
            .wrap_err_with(|| format!("writing {}", args.vessel.display()))?;
        info!(path = %args.vessel.display(), "updated staging");
    }

    Ok(())
}

fn update_settings(args: &SettingsArgs, path: &Path) -> eyre::Result<()> {
    let mut settings = Settings::load(path);
    let before = settings.clone();
    if let Some(v) = args.auto_update_staging {
        settings.auto_update_staging = v;
    }
    if let Some(v) = args.advanced {
        settings.advanced_simulation = v;
    }
    if let Some(v) = args.limit_to_terminal_velocity {
        settings.limit_to_terminal_velocity = v;
    }
    if settings != before {
        settings.save(path)?;
    }
    print!("{}", toml::to_string(&settings)?);
    Ok(())
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Compute(args) => compute(args, &Settings::load(&cli.settings)),
        Command::Settings(args) => update_settings(&args, &cli.settings),
    }
}

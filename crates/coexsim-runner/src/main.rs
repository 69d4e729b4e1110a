//! # coexsim
//!
//! Command-line entry point of the Wi-Fi / NR-U coexistence simulator.

use clap::{Parser, Subcommand, ValueEnum};
use coexsim_common::metric_defs;
use coexsim_model::{load_config, CwStrategy, DynamicCwParams, RunConfig};
use coexsim_radio::dynamic_cw::{predicted_collision_probability, CwSearchRange, SolverModel};
use coexsim_runner::calibration::{calibrate, CalibrationPoint};
use coexsim_runner::metrics_export::{self, InMemoryRecorder};
use coexsim_runner::{run_many, RunnerError};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Output format for metrics at end of the batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MetricsOutputFormat {
    /// JSON format for programmatic consumption.
    Json,
    /// Prometheus text exposition format.
    Prometheus,
}

/// Method used by `coexsim solve-cw`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SolverStrategy {
    /// Saturated-DCF throughput optimum.
    ClosedForm,
    /// Short simulations over the window grid; occupancies cross at the result.
    Calibration,
}

impl From<SolverStrategy> for CwStrategy {
    fn from(strategy: SolverStrategy) -> Self {
        match strategy {
            SolverStrategy::ClosedForm => CwStrategy::ClosedForm,
            SolverStrategy::Calibration => CwStrategy::Calibration,
        }
    }
}

/// Wi-Fi / NR-U coexistence simulator
#[derive(Parser, Debug)]
#[command(name = "coexsim")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the configured batch and print one report per run as JSON
    Run(RunArgs),
    /// Size the Wi-Fi contention window for a node density
    SolveCw(SolveCwArgs),
    /// List all metrics emitted by the stations
    Metrics,
}

/// Arguments of `coexsim run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// YAML configuration file.
    pub config: PathBuf,

    /// Seed of the first run.
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Number of independent runs.
    #[arg(long)]
    pub runs: Option<u32>,

    /// Simulated time per run in microseconds.
    #[arg(long)]
    pub duration_us: Option<u64>,

    /// Number of Wi-Fi stations.
    #[arg(long)]
    pub wifi: Option<u32>,

    /// Number of NR-U gNBs.
    #[arg(long)]
    pub nru: Option<u32>,

    /// Include the finalized transmission records in each report.
    #[arg(long)]
    pub records: bool,

    /// Write reports to this file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format for metrics at end of the batch.
    #[arg(long, value_enum)]
    pub metrics_output: Option<MetricsOutputFormat>,

    /// File path to write metrics (stdout if not specified).
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,
}

/// Arguments of `coexsim solve-cw`.
#[derive(Parser, Debug)]
pub struct SolveCwArgs {
    /// Number of Wi-Fi stations.
    #[arg(long)]
    pub wifi: u32,

    /// Number of NR-U gNBs.
    #[arg(long)]
    pub nru: u32,

    /// Smallest candidate window.
    #[arg(long, default_value_t = CwSearchRange::default().min_cw)]
    pub min_cw: u32,

    /// Largest candidate window.
    #[arg(long, default_value_t = CwSearchRange::default().max_cw)]
    pub max_cw: u32,

    /// Wi-Fi payload used to cost a collision.
    #[arg(long, default_value_t = 1472)]
    pub payload_bytes: u32,

    /// Wi-Fi MCS used to cost a collision.
    #[arg(long, default_value_t = 7)]
    pub mcs: u8,

    /// Sizing method.
    #[arg(long, value_enum, default_value_t = SolverStrategy::ClosedForm)]
    pub strategy: SolverStrategy,

    /// Base configuration of calibration runs (built-in defaults otherwise).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Spacing of the calibration grid.
    #[arg(long, default_value_t = DynamicCwParams::default().step)]
    pub step: u32,

    /// Simulated time of each calibration run in microseconds.
    #[arg(long, default_value_t = DynamicCwParams::default().calibration_duration_us)]
    pub calibration_duration_us: u64,

    /// Calibration runs averaged per grid window.
    #[arg(long, default_value_t = DynamicCwParams::default().calibration_runs)]
    pub calibration_runs: u32,
}

/// Output of `coexsim solve-cw`.
#[derive(Debug, Serialize)]
struct SolveCwOutput {
    wifi: u32,
    nru: u32,
    strategy: CwStrategy,
    min_cw: u32,
    max_cw: u32,
    cw: u32,
    predicted_collision_probability: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    calibration: Vec<CalibrationPoint>,
}

// ============================================================================
// Commands
// ============================================================================

impl RunArgs {
    /// Load the configuration file and apply command-line overrides.
    fn resolve_config(&self) -> Result<RunConfig, RunnerError> {
        let mut config = load_config(&self.config)?;
        if let Some(seed) = self.seed {
            config.simulation.seed = seed;
        }
        if let Some(runs) = self.runs {
            config.simulation.runs = runs;
        }
        if let Some(duration_us) = self.duration_us {
            config.simulation.duration_us = duration_us;
        }
        if let Some(wifi) = self.wifi {
            config.nodes.wifi = wifi;
        }
        if let Some(nru) = self.nru {
            config.nodes.nru = nru;
        }
        config.validate()?;
        Ok(config)
    }
}

fn run_command(args: RunArgs) -> Result<(), RunnerError> {
    let config = args.resolve_config()?;

    let recorder = if args.metrics_output.is_some() {
        let recorder = InMemoryRecorder::new();
        if let Err(e) = metrics::set_global_recorder(recorder.clone()) {
            tracing::warn!("Failed to set metrics recorder: {}", e);
            None
        } else {
            metric_defs::describe_metrics();
            Some(recorder)
        }
    } else {
        None
    };

    let reports = run_many(&config, args.records)?;

    let metrics_to_stdout = args.metrics_output.is_some() && args.metrics_file.is_none();
    match &args.output {
        Some(path) => {
            let mut file = std::fs::File::create(path)?;
            serde_json::to_writer_pretty(&mut file, &reports)?;
            writeln!(file)?;
        }
        // Metrics own stdout when no file was given for them.
        None if !metrics_to_stdout => println!("{}", serde_json::to_string_pretty(&reports)?),
        None => {}
    }

    if let (Some(format), Some(recorder)) = (args.metrics_output, recorder) {
        let mut writer: Box<dyn Write> = match &args.metrics_file {
            Some(path) => Box::new(std::fs::File::create(path)?),
            None => Box::new(std::io::stdout()),
        };
        let snapshot = recorder.snapshot();
        match format {
            MetricsOutputFormat::Json => metrics_export::export_json(&snapshot, &mut writer)?,
            MetricsOutputFormat::Prometheus => {
                metrics_export::export_prometheus(&snapshot, &recorder.descriptions(), &mut writer)?
            }
        }
        writer.flush()?;
    }

    Ok(())
}

fn solve_cw_command(args: SolveCwArgs) -> Result<(), RunnerError> {
    if args.min_cw == 0 || args.min_cw > args.max_cw {
        return Err(RunnerError::ConfigError(format!(
            "invalid search range [{}, {}]",
            args.min_cw, args.max_cw
        )));
    }
    let range = CwSearchRange {
        min_cw: args.min_cw,
        max_cw: args.max_cw,
    };
    let (cw, calibration) = match args.strategy {
        SolverStrategy::ClosedForm => {
            let model = SolverModel::for_frame(args.payload_bytes, args.mcs)
                .map_err(|e| RunnerError::ConfigError(e.to_string()))?;
            (model.solve(args.wifi, args.nru, range), Vec::new())
        }
        SolverStrategy::Calibration => {
            let mut config = match &args.config {
                Some(path) => load_config(path)?,
                None => RunConfig::default(),
            };
            config.nodes.wifi = args.wifi;
            config.nodes.nru = args.nru;
            config.wifi.payload_bytes = args.payload_bytes;
            config.wifi.mcs = args.mcs;
            config.dynamic_cw = DynamicCwParams {
                strategy: args.strategy.into(),
                min_cw: range.min_cw,
                max_cw: range.max_cw,
                step: args.step,
                calibration_duration_us: args.calibration_duration_us,
                calibration_runs: args.calibration_runs,
            };
            let result = calibrate(&config)?;
            (result.cw, result.points)
        }
    };

    let output = SolveCwOutput {
        wifi: args.wifi,
        nru: args.nru,
        strategy: args.strategy.into(),
        min_cw: range.min_cw,
        max_cw: range.max_cw,
        cw,
        predicted_collision_probability: predicted_collision_probability(args.wifi.saturating_add(args.nru), cw),
        calibration,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Print every metric with its kind, unit and description.
fn print_metrics_info() {
    println!("coexsim metrics");
    println!("===============\n");
    println!("All metrics carry the labels:");
    println!("  - node: station name (wifi-N, gnb-N)");
    println!("  - technology: wifi or nru");
    println!();

    for def in metric_defs::ALL {
        let unit = if def.unit.is_empty() {
            String::new()
        } else {
            format!(" [{}]", def.unit)
        };
        println!("{} ({}){}", def.name, def.kind, unit);
        println!("    {}", def.description);
    }
}

fn main() -> Result<(), RunnerError> {
    // Default to "warn" if RUST_LOG is not set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_command(args)?,
        Commands::SolveCw(args) => solve_cw_command(args)?,
        Commands::Metrics => print_metrics_info(),
    }

    Ok(())
}

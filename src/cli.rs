use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use breakwater_sim::config::Config;
use breakwater_sim::replay::{self, ReplaySchedule};
use breakwater_sim::rng::SimRng;
use breakwater_sim::stats::{percentile, JsonTraceSink, ReallocScheduleRecord};
use breakwater_sim::task::TaskTimes;
use breakwater_sim::SimulationState;

#[derive(Parser, Debug)]
#[command(name = "breakwater-sim", version, about = "Breakwater admission-control simulator")]
pub struct SimCli {
    #[arg(long, global = true)]
    /// Emit one JSON-line summary per tick-sampled metric to stderr instead
    /// of the default human-readable log format.
    json_logs: bool,

    #[arg(long, global = true)]
    /// Raise the default log level to debug.
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a simulation from a configuration file and write trace streams
    /// to an output directory.
    Run {
        /// Path to a JSON or YAML configuration file.
        config: PathBuf,
        #[arg(short, long, default_value = "traces")]
        output: PathBuf,
        /// Override the config's run name (and therefore its RNG seed).
        #[arg(long)]
        name: Option<String>,
        /// Replay a prior run's realloc_schedule.jsonl instead of driving
        /// the core-allocation controller live.
        #[arg(long)]
        replay_from: Option<PathBuf>,
    },
    /// Parse and validate a configuration file without running it.
    Validate { config: PathBuf },
}

impl SimCli {
    pub fn command(&self) -> &Command {
        &self.command
    }
}

pub fn run() -> Result<()> {
    let cli = SimCli::parse();
    init_logging(cli.debug, cli.json_logs);

    match &cli.command {
        Command::Run { config, output, name, replay_from } => {
            handle_run(config, output, name.clone(), replay_from.as_deref())
        }
        Command::Validate { config } => handle_validate(config),
    }
}

fn init_logging(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
    let cfg = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&raw).with_context(|| format!("parsing YAML config {}", path.display()))?
        }
        _ => serde_json::from_str(&raw).with_context(|| format!("parsing JSON config {}", path.display()))?,
    };
    Ok(cfg)
}

fn handle_validate(config_path: &Path) -> Result<()> {
    let cfg = load_config(config_path)?;
    cfg.validate().context("configuration is invalid")?;
    info!(name = %cfg.name, "configuration is valid");
    Ok(())
}

fn handle_run(
    config_path: &Path,
    output_dir: &Path,
    name_override: Option<String>,
    replay_from: Option<&Path>,
) -> Result<()> {
    let mut cfg = load_config(config_path)?;
    if let Some(name) = name_override {
        cfg.name = name;
    }
    cfg.validate().context("configuration is invalid")?;

    let rng = SimRng::from_run_name(&cfg.name);

    let replay = match replay_from {
        Some(path) => Some(load_replay_schedule(path)?),
        None => None,
    };

    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;

    let mut state = SimulationState::new(cfg, rng, replay).context("initializing simulation state")?;

    let task_times = open_trace_file(output_dir, "task_times.jsonl")?;
    let credit_pool = open_trace_file(output_dir, "credit_pool.jsonl")?;
    let cores_over_time = open_trace_file(output_dir, "cores_over_time.jsonl")?;
    let throughput = open_trace_file(output_dir, "throughput_over_time.jsonl")?;
    let drops = open_trace_file(output_dir, "drops_record.jsonl")?;
    let core_deallocations = open_trace_file(output_dir, "core_deallocations.jsonl")?;
    let realloc_schedule = open_trace_file(output_dir, "realloc_schedule.jsonl")?;
    let ws_checks = open_trace_file(output_dir, "ws_checks.jsonl")?;
    let breakwater_info = open_trace_file(output_dir, "breakwater_info.jsonl")?;

    let mut sink = JsonTraceSink::new(
        task_times,
        credit_pool,
        cores_over_time,
        throughput,
        drops,
        core_deallocations,
        realloc_schedule,
        ws_checks,
        breakwater_info,
    );

    state.run(&mut sink)?;
    info!(output = %output_dir.display(), "traces written");

    let mut latencies: Vec<_> = state.task_times().iter().map(TaskTimes::total_latency).collect();
    latencies.sort_unstable();
    if !latencies.is_empty() {
        info!(
            p50 = percentile(&latencies, 50.0),
            p99 = percentile(&latencies, 99.0),
            samples = latencies.len(),
            "completed-task latency summary"
        );
    }

    Ok(())
}

fn open_trace_file(dir: &Path, name: &str) -> Result<fs::File> {
    let path = dir.join(name);
    fs::File::create(&path).with_context(|| format!("creating trace file {}", path.display()))
}

/// Parse a captured `realloc_schedule.jsonl` (one `ReallocScheduleRecord`
/// per line, as written by `JsonTraceSink`) back into a replayable schedule.
fn load_replay_schedule(path: &Path) -> Result<ReplaySchedule> {
    if !path.exists() {
        bail!("replay source {} does not exist", path.display());
    }
    let raw = fs::read_to_string(path).with_context(|| format!("reading replay source {}", path.display()))?;
    let records = raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str::<ReallocScheduleRecord>(line)
                .with_context(|| format!("parsing replay record in {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(replay::schedule_from_records(&records))
}

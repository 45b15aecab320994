//! # Crossway Simulation Driver
//!
//! Central coordinator for the intersection simulation: parses the CLI,
//! loads and validates configuration, wires up logging, runs the
//! vehicle-generator and schedule/execute tasks, and handles
//! signal-driven graceful shutdown.

mod export;
mod sim;
mod snapshot;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use crossway_common::config::{load_config_file, ConfigError, SimConfig};
use crossway_common::types::{AccessStrategy, SchedulingPolicy};
use crossway_kernel::system::TrafficSystem;

/// Scheduler-driven four-way intersection simulator.
#[derive(Debug, Parser)]
#[command(name = "crossway", version, about)]
struct Cli {
    /// Simulation duration in seconds.
    #[arg(long)]
    duration: Option<u64>,

    /// Minimum vehicle inter-arrival time in seconds.
    #[arg(long)]
    min_arrival: Option<u64>,

    /// Maximum vehicle inter-arrival time in seconds.
    #[arg(long)]
    max_arrival: Option<u64>,

    /// Scheduler time quantum in seconds.
    #[arg(long)]
    quantum: Option<u64>,

    /// Scheduling algorithm.
    #[arg(long, value_parser = parse_algorithm)]
    algorithm: Option<SchedulingPolicy>,

    /// Crossing-grant strategy.
    #[arg(long, value_parser = parse_strategy)]
    strategy: Option<AccessStrategy>,

    /// RNG seed for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,

    /// Optional configuration file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Append a metrics row to this CSV file at shutdown.
    #[arg(long)]
    metrics_csv: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    /// Disable colored output.
    #[arg(long)]
    no_color: bool,
}

fn parse_algorithm(value: &str) -> Result<SchedulingPolicy, String> {
    match value {
        "sjf" => Ok(SchedulingPolicy::Sjf),
        "mlfq" => Ok(SchedulingPolicy::MultilevelFeedback),
        "prr" => Ok(SchedulingPolicy::PriorityRoundRobin),
        other => Err(format!("unknown algorithm '{other}' (expected sjf, mlfq, or prr)")),
    }
}

fn parse_strategy(value: &str) -> Result<AccessStrategy, String> {
    match value {
        "fifo" => Ok(AccessStrategy::Fifo),
        "bankers" => Ok(AccessStrategy::Bankers),
        "hybrid" => Ok(AccessStrategy::Hybrid),
        other => Err(format!(
            "unknown strategy '{other}' (expected fifo, bankers, or hybrid)"
        )),
    }
}

/// Merge the CLI flags over the (optional) config file.
fn resolve_config(cli: &Cli) -> Result<SimConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config_file(path)?,
        None => SimConfig::default(),
    };

    if let Some(duration) = cli.duration {
        config.simulation.duration_s = duration;
    }
    if let Some(min_arrival) = cli.min_arrival {
        config.simulation.min_arrival_s = min_arrival;
    }
    if let Some(max_arrival) = cli.max_arrival {
        config.simulation.max_arrival_s = max_arrival;
    }
    if let Some(seed) = cli.seed {
        config.simulation.seed = Some(seed);
    }
    if let Some(quantum) = cli.quantum {
        config.scheduler.time_quantum_s = quantum;
    }
    if let Some(algorithm) = cli.algorithm {
        config.scheduler.algorithm = algorithm;
    }
    if let Some(strategy) = cli.strategy {
        config.intersection.strategy = strategy;
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(debug: bool, no_color: bool) {
    let filter = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_ansi(!no_color)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version print through clap's own path.
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging(cli.debug, cli.no_color);

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            error!("invalid configuration: {err}");
            return ExitCode::from(1);
        }
    };

    info!(
        duration_s = config.simulation.duration_s,
        algorithm = config.scheduler.algorithm.name(),
        strategy = ?config.intersection.strategy,
        "starting intersection simulation"
    );

    let duration = Duration::from_secs(config.simulation.duration_s);
    let system = Arc::new(TrafficSystem::new(config));
    let keep_running = Arc::new(AtomicBool::new(true));
    system.start();

    let start = std::time::Instant::now();
    let generator = tokio::spawn(sim::run_generator(
        Arc::clone(&system),
        Arc::clone(&keep_running),
        start,
        duration,
    ));
    let driver = tokio::spawn(sim::run_driver(
        Arc::clone(&system),
        Arc::clone(&keep_running),
        start,
        duration,
    ));

    let mut exit = ExitCode::SUCCESS;
    tokio::select! {
        result = driver => {
            match result {
                Ok(()) => info!("simulation completed"),
                Err(err) => {
                    error!("simulation driver failed: {err}");
                    exit = ExitCode::from(2);
                }
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    // Graceful shutdown: stop the scheduler and let tasks drain.
    keep_running.store(false, Ordering::SeqCst);
    system.stop();
    let _ = generator.await;

    let now = start.elapsed();
    let report = system.report(now);
    info!(
        vehicles = report.total_vehicles_processed,
        veh_per_min = report.vehicles_per_minute,
        avg_wait_s = report.avg_wait_s,
        utilization = report.utilization,
        fairness = report.fairness_index,
        context_switches = report.context_switches,
        deadlocks_prevented = report.deadlocks_prevented,
        emergencies = report.emergencies_handled,
        "final simulation metrics"
    );

    if let Some(path) = &cli.metrics_csv {
        match export::append_metrics_csv(path, &report) {
            Ok(()) => info!(path = %path.display(), "metrics row exported"),
            Err(err) => {
                error!("metrics export failed: {err}");
                exit = ExitCode::from(2);
            }
        }
    }

    exit
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

//! ---
//! mbs_section: "01-core-functionality"
//! mbs_subsection: "binary"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Binary entrypoint for the membarrier stress harness."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
mod control;
mod summary;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use mbs_common::config::StressConfig;
use mbs_common::logging::{init_tracing, LogFormat};
use mbs_logging::{LogSink, TracingLogSink};
use mbs_metrics::{new_registry, write_text, StressMetrics};
use mbs_rt::{default_alt_stack_size, CapabilityProbe, Coordinator, CoordinatorOptions};
use tokio::signal;
use tracing::{info, warn};

use crate::control::BudgetedRunControl;
use crate::summary::RunSummary;

const DEFAULT_CONFIG_PATH: &str = "configs/membarrier.toml";

#[derive(Debug, Parser)]
#[command(author, version, about = "membarrier(2) stressor", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Override log format (pretty, structured-json)")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the stressor until its budget is spent")]
    Run(RunArgs),
    #[command(about = "Print the kernel's membarrier command mask")]
    Probe,
}

#[derive(Debug, Default, Args)]
struct RunArgs {
    #[arg(long, help = "Stop after this many bogo ops")]
    ops: Option<u64>,

    #[arg(long, value_name = "SECS", help = "Stop after this many seconds")]
    timeout: Option<u64>,

    #[arg(long, help = "Worker threads to start")]
    workers: Option<usize>,

    #[arg(long, help = "Instance name prefixed to every log line")]
    instance: Option<String>,

    #[arg(long, value_name = "FILE", help = "Write Prometheus text metrics here")]
    metrics_out: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Write a JSON run summary here")]
    summary_json: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG_PATH));
    let loaded = StressConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;

    let command = cli.command.unwrap_or(Commands::Run(RunArgs::default()));
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    if let Commands::Run(args) = &command {
        apply_overrides(&mut config, args);
    }
    config.validate()?;
    init_tracing("mbs-stressd", &config.logging)?;

    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using defaults"),
    }

    let code = match command {
        Commands::Run(args) => run_stressor(config, args).await?,
        Commands::Probe => probe(&config),
    };
    Ok(code)
}

fn apply_overrides(config: &mut StressConfig, args: &RunArgs) {
    if let Some(ops) = args.ops {
        config.run.ops = ops;
    }
    if let Some(secs) = args.timeout {
        config.run.timeout = Duration::from_secs(secs);
    }
    if let Some(workers) = args.workers {
        config.workers.count = workers;
    }
    if let Some(instance) = &args.instance {
        config.instance = instance.clone();
    }
    if let Some(path) = &args.metrics_out {
        config.metrics.output = Some(path.clone());
    }
}

fn coordinator_options(config: &StressConfig) -> CoordinatorOptions {
    let alt_stack_size = match config.workers.alt_stack_size {
        0 => default_alt_stack_size(),
        bytes => bytes,
    };
    CoordinatorOptions {
        workers: config.workers.count,
        alt_stack_size,
    }
}

async fn run_stressor(config: StressConfig, args: RunArgs) -> Result<ExitCode> {
    let metrics = if config.metrics.enabled {
        Some(StressMetrics::new(new_registry())?)
    } else {
        info!("metrics disabled by configuration");
        None
    };

    let mut coordinator = Coordinator::system().with_options(coordinator_options(&config));
    if let Some(metrics) = &metrics {
        coordinator = coordinator.with_metrics(metrics.clone());
    }

    let control = Arc::new(BudgetedRunControl::new(
        config.run.max_ops(),
        config.run.deadline(),
    ));
    let log: Arc<dyn LogSink> = Arc::new(TracingLogSink::new(config.instance.clone()));
    info!(
        instance = %config.instance,
        workers = config.workers.count,
        ops = config.run.ops,
        timeout_secs = config.run.timeout.as_secs(),
        "starting stress run"
    );

    let started = Instant::now();
    let mut task = {
        let control = control.clone();
        tokio::task::spawn_blocking(move || coordinator.run_with_report(control, log))
    };
    let report = tokio::select! {
        joined = &mut task => joined?,
        interrupt = signal::ctrl_c() => {
            match interrupt {
                Ok(()) => {
                    info!("ctrl-c received; stopping run");
                    control.stop();
                }
                Err(err) => warn!(error = %err, "unable to listen for ctrl-c"),
            }
            task.await?
        }
    };
    let elapsed = started.elapsed();

    let summary = RunSummary::from_report(&config.instance, &report, elapsed, control.is_stopped());
    if report.outcome.is_success() {
        println!("{}", summary.line());
    }
    info!(
        outcome = %report.outcome,
        bogo_ops = report.iterations,
        workers_started = report.workers_started,
        workers_joined = report.joins.joined,
        "stress run finished"
    );

    if let Some(path) = &args.summary_json {
        summary.write_json(path)?;
        info!(path = %path.display(), "run summary written");
    }
    if let (Some(metrics), Some(path)) = (&metrics, &config.metrics.output) {
        write_text(&metrics.registry(), path)?;
        info!(path = %path.display(), "metrics written");
    }

    Ok(ExitCode::from(report.outcome.exit_code()))
}

fn probe(config: &StressConfig) -> ExitCode {
    let log = TracingLogSink::new(config.instance.clone());
    match CapabilityProbe::system().query() {
        Ok(mask) => {
            println!(
                "{}: membarrier commands {} [{}]",
                config.instance,
                mask,
                mask.command_names().join(", ")
            );
            if mask.supports_shared_barrier() {
                ExitCode::SUCCESS
            } else {
                log.info("membarrier MEMBARRIER_CMD_SHARED not supported");
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            log.fail(&err.to_string());
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_replace_config_values() {
        let mut config = StressConfig::default();
        let args = RunArgs {
            ops: Some(1_000),
            timeout: Some(0),
            workers: Some(8),
            instance: Some("mb-7".into()),
            metrics_out: Some(PathBuf::from("out/metrics.prom")),
            summary_json: None,
        };
        apply_overrides(&mut config, &args);
        assert_eq!(config.run.ops, 1_000);
        assert!(config.run.deadline().is_none());
        assert_eq!(config.workers.count, 8);
        assert_eq!(config.instance, "mb-7");
        assert_eq!(config.metrics.output, Some(PathBuf::from("out/metrics.prom")));
        config.validate().unwrap();
    }

    #[test]
    fn unbounded_overrides_fail_validation() {
        let mut config = StressConfig::default();
        let args = RunArgs {
            timeout: Some(0),
            ..RunArgs::default()
        };
        apply_overrides(&mut config, &args);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_alt_stack_selects_platform_minimum() {
        let mut config = StressConfig::default();
        assert_eq!(
            coordinator_options(&config).alt_stack_size,
            default_alt_stack_size()
        );
        config.workers.alt_stack_size = 1 << 16;
        assert_eq!(coordinator_options(&config).alt_stack_size, 1 << 16);
    }

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::try_parse_from([
            "mbs-stressd",
            "--log-format",
            "json",
            "run",
            "--ops",
            "10",
            "--workers",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.log_format, Some(LogFormat::StructuredJson));
        match cli.command {
            Some(Commands::Run(args)) => {
                assert_eq!(args.ops, Some(10));
                assert_eq!(args.workers, Some(2));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}

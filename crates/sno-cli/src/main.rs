use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use sno_core::models::{LifecycleReport, StepOutcome};
use sno_core::ApplicationOrchestrator;

#[derive(Parser)]
#[command(
    name = "sno",
    about = "Deploy the social network experiment, keep it up until Ctrl+C, then tear it down",
    version
)]
struct Cli {
    /// Deployment file (nodes, registry, front, dbs, caches, actors)
    config: PathBuf,

    /// Where logs, monitor samples and inventories are collected
    #[arg(long, env = "SNO_OUT", default_value_os_t = default_output_dir())]
    out: PathBuf,

    /// Skip loading the database scripts once the deployment is running
    #[arg(long)]
    no_fill: bool,

    /// Log at debug level, including the output of every remote command
    #[arg(long)]
    debug: bool,
}

fn default_output_dir() -> PathBuf {
    std::env::temp_dir().join("social-network-results")
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.out)?;
    let _guard = setup_logging(&cli.out, cli.debug);

    let mut orchestrator = ApplicationOrchestrator::from_file(&cli.config, &cli.out)?;

    // Ctrl+C during startup or data loading still tears down what is up.
    let started = tokio::select! {
        started = orchestrator.start() => Some(started),
        _ = tokio::signal::ctrl_c() => None,
    };
    match started {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            tracing::error!(error = %e, "startup aborted, tearing down what was started");
            print_report(&orchestrator.teardown().await);
            return Err(e.into());
        }
        None => {
            tracing::warn!("interrupted during startup, tearing down");
            print_report(&orchestrator.teardown().await);
            return Ok(());
        }
    }

    if !cli.no_fill {
        let filled = tokio::select! {
            filled = orchestrator.fill() => Some(filled),
            _ = tokio::signal::ctrl_c() => None,
        };
        match filled {
            Some(Ok(status)) => {
                if status.is_failed() {
                    tracing::warn!(failures = %status.failure_summary(), "some data loads failed");
                }
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "data loading aborted, tearing down");
                print_report(&orchestrator.teardown().await);
                return Err(e.into());
            }
            None => {
                tracing::warn!("interrupted during data loading, tearing down");
                print_report(&orchestrator.teardown().await);
                return Ok(());
            }
        }
    }

    tracing::info!(out = %cli.out.display(), "deployment running, press Ctrl+C to tear down");
    tokio::signal::ctrl_c().await?;

    let report = orchestrator.teardown().await;
    print_report(&report);
    Ok(())
}

/// Stderr at `info` (or `debug`), plus a plain-text copy in `<out>/sno.log`.
/// Returns the guard that must be held alive for the duration of the program.
fn setup_logging(out: &Path, debug: bool) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::never(out, "sno.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let default_level = if debug { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    guard
}

fn print_report(report: &LifecycleReport) {
    for step in &report.steps {
        match &step.outcome {
            StepOutcome::Ok => println!("  ok       {}", step.step),
            StepOutcome::Skipped(reason) => println!("  skipped  {} ({reason})", step.step),
            StepOutcome::Failed(reason) => println!("  FAILED   {}: {reason}", step.step),
        }
    }
    let failed = report.failed_steps().count();
    if failed > 0 {
        println!("teardown finished with {failed} failed step(s)");
    } else {
        println!("teardown finished cleanly");
    }
}

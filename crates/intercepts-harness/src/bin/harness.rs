//! CLI entrypoint for the intercepts verification harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use intercepts_core::PoolIsolation;
use intercepts_harness::{LogEmitter, run_all, validate_log_file};
use tracing_subscriber::EnvFilter;

/// Verification tooling for intercepts.
#[derive(Debug, Parser)]
#[command(name = "intercepts-harness")]
#[command(about = "Scenario runner and log validator for intercepts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every interception scenario.
    Run {
        /// Constant-pool isolation mode.
        #[arg(long, default_value = "thread", value_parser = ["thread", "serialized"])]
        isolation: String,
        /// Structured JSONL log output path.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Validate a structured JSONL log.
    ValidateLog {
        /// JSONL log path.
        #[arg(long)]
        log: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Run { isolation, log } => {
            let isolation = PoolIsolation::from_str_loose(&isolation);
            let run_id = format!("run-{}", std::process::id());
            let mut emitter = match &log {
                Some(path) => Some(LogEmitter::to_file(path, "intercepts", &run_id)?),
                None => None,
            };
            let reports = run_all(isolation, emitter.as_mut())?;

            let failed: Vec<_> = reports.iter().filter(|r| !r.passed()).collect();
            for report in &reports {
                let status = if report.passed() { "PASS" } else { "FAIL" };
                eprintln!(
                    "[{status}] {} ({isolation}, {} ns)",
                    report.scenario.as_str(),
                    report.latency_ns
                );
                if let Some(err) = &report.error {
                    eprintln!("       {err}");
                }
            }
            if let Some(path) = &log {
                eprintln!("Wrote structured log to {}", path.display());
            }
            if !failed.is_empty() {
                return Err(format!("{} of {} scenarios failed", failed.len(), reports.len()).into());
            }
        }
        Command::ValidateLog { log } => {
            let (lines, errors) = validate_log_file(&log)?;
            for err in &errors {
                eprintln!("{err}");
            }
            if !errors.is_empty() {
                return Err(format!(
                    "{} validation error(s) in {} line(s) of {}",
                    errors.len(),
                    lines,
                    log.display()
                )
                .into());
            }
            eprintln!("{lines} line(s) valid in {}", log.display());
        }
    }

    Ok(())
}

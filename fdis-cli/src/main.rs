mod cli;
mod config;
mod error;
mod logging;

use std::process;

use clap::Parser;
use fdis_pipeline::{CancellationToken, Orchestrator, OutcomeKind, RunReport};
use tracing::{error, info, warn};

use crate::cli::Args;
use crate::error::Result;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    process::exit(run(args).await);
}

/// Run the pipeline and map the result to an exit code.
///
/// The logging guard lives for the whole call so buffered file output is
/// flushed before the process exits.
async fn run(args: Args) -> i32 {
    let _guard = match logging::init_logging(&args.log_dir, args.verbose, args.quiet) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            return e.exit_code();
        }
    };
    if let Err(e) = logging::cleanup_old_logs(&args.log_dir, logging::LOG_RETENTION_DAYS).await {
        warn!(error = %e, "Log cleanup failed");
    }

    match execute(&args).await {
        Ok(report) => {
            print_summary(&report);
            report.exit_code()
        }
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            e.exit_code()
        }
    }
}

async fn execute(args: &Args) -> Result<RunReport> {
    let config = config::resolve(args)?;

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            signal_token.cancel();
        }
    });

    let orchestrator = Orchestrator::new(fdis_stages::default_registry());
    info!("Starting fdis v{}", env!("CARGO_PKG_VERSION"));
    let report = orchestrator.run(&config, token).await?;
    Ok(report)
}

fn print_summary(report: &RunReport) {
    for component in &report.components {
        println!(
            "{:<40} {:>6} ok {:>6} failed {:>6} skipped",
            component.name,
            component.count(OutcomeKind::Success),
            component.count(OutcomeKind::Failure),
            component.count(OutcomeKind::Skipped),
        );
    }
    for outcome in report.outcomes().filter(|o| o.is_failure()) {
        println!("  {outcome}");
    }
    println!("{report}");
}

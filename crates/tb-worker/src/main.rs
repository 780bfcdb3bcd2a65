use std::fs::File;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::Parser;
use tb_core::{EndpointId, WorkerExitCode};
use tb_worker::{run_agent, WorkerArgs};
use tracing_subscriber::EnvFilter;

fn init_logging(log_file: &Path) -> anyhow::Result<()> {
    let file = File::create(log_file)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tb=info")),
        )
        .with_ansi(false)
        .with_writer(Arc::new(file))
        .init();
    Ok(())
}

fn run(args: WorkerArgs) -> anyhow::Result<WorkerExitCode> {
    let scratch = tempfile::Builder::new().prefix("testbench-").tempdir()?;
    let log_file = args
        .log_file
        .clone()
        .unwrap_or_else(|| scratch.path().join("worker.log"));
    init_logging(&log_file)?;

    let endpoint = EndpointId::for_worker(std::process::id());
    tracing::info!(endpoint = %endpoint, controller = %args.controller, "worker starting");

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(run_agent(&args, endpoint, scratch.path(), Some(log_file)))?;
    tracing::info!(outcome = ?outcome, "worker exiting");
    Ok(outcome.exit_code())
}

fn main() {
    let args = match WorkerArgs::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            std::process::exit(0);
        }
        Err(e) => {
            let _ = e.print();
            std::process::exit(WorkerExitCode::Configuration.code());
        }
    };

    let code = match std::panic::catch_unwind(AssertUnwindSafe(|| run(args))) {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            tracing::error!(error = ?e, "worker failed");
            eprintln!("tb-worker: {e:#}");
            WorkerExitCode::UnhandledFault
        }
        Err(_) => WorkerExitCode::UnhandledFault,
    };
    std::process::exit(code.code());
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use tb_channel::{ChannelHost, Notification};
use tb_core::archive::pack_directory;
use tb_core::plan::{parse_plan_file, unsupported_steps, validate_plan};
use tb_core::{EndpointId, TestExecutionResult, TestReport};
use tokio::sync::broadcast::error::RecvError;

use crate::client::Target;
use crate::output::{print_result, print_section};

const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);
const SHUTDOWN_FLUSH: Duration = Duration::from_secs(2);

pub fn run(
    target: Target,
    plan_path: PathBuf,
    assets: Option<PathBuf>,
    report_path: Option<PathBuf>,
) -> Result<()> {
    let plan = parse_plan_file(&plan_path)?;
    validate_plan(&plan)?;
    let unsupported = unsupported_steps(&plan);
    if !unsupported.is_empty() {
        eprintln!(
            "{} plan contains {} step(s) of an unsupported kind",
            "warning:".yellow().bold(),
            unsupported.len()
        );
    }

    let staging = tempfile::Builder::new().prefix("tb-run-").tempdir()?;
    let archive = staging.path().join("test-files.zip");
    let packed = match &assets {
        Some(dir) => {
            if !dir.is_dir() {
                bail!("assets directory not found: {}", dir.display());
            }
            pack_directory(dir, &archive)?
        }
        None => {
            let empty = staging.path().join("empty");
            std::fs::create_dir(&empty)?;
            pack_directory(&empty, &archive)?
        }
    };
    println!(
        "Running plan '{}' ({} step(s), {} test file(s)) on {}",
        plan.name.bold(),
        plan.steps.len(),
        packed,
        target.address
    );

    let rt = tokio::runtime::Runtime::new()?;
    let (result, report) = rt.block_on(async {
        let host = ChannelHost::new(EndpointId::for_client());
        let events = host.subscribe_notifications();
        let client = target.connect_with(host.clone()).await?;
        let token = host.broker().register(&archive);

        client
            .execute(plan.steps.clone(), plan.environment.clone(), token)
            .await
            .context("controller rejected the run")?;

        let outcome = follow(&host, client.controller(), events).await;
        host.broker().revoke(&token);
        host.shutdown(SHUTDOWN_FLUSH).await;
        outcome
    })?;

    if let Some(path) = &report_path {
        write_report(path, &report)?;
        println!("Report written to {}", path.display());
    }

    print_result(result);
    match result {
        TestExecutionResult::Passed => Ok(()),
        TestExecutionResult::Failed => bail!("run failed"),
    }
}

/// Print the controller's notifications until it publishes a result.
async fn follow(
    host: &ChannelHost,
    controller: &EndpointId,
    mut events: tokio::sync::broadcast::Receiver<tb_channel::IncomingNotification>,
) -> Result<(TestExecutionResult, TestReport)> {
    let mut report = TestReport::new();
    let mut liveness = tokio::time::interval(LIVENESS_INTERVAL);

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(incoming) if &incoming.from == controller => match incoming.notification {
                    Notification::ExecutionProgress { section_group, section } => {
                        print_section(&section_group, &section);
                        report.push(section_group, section);
                    }
                    Notification::TestCompletion { result } => return Ok((result, report)),
                },
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    eprintln!("{} {missed} notification(s) were dropped", "warning:".yellow().bold());
                }
                Err(RecvError::Closed) => bail!("notification stream closed"),
            },
            _ = liveness.tick() => {
                if !host.is_connected(controller) {
                    bail!("lost connection to controller {controller} before the run finished");
                }
            }
        }
    }
}

fn write_report(path: &Path, report: &TestReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write report: {}", path.display()))?;
    Ok(())
}

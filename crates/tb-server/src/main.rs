mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tb_channel::{Capability, ChannelHost, Listener};
use tb_controller::{ControllerService, ProcessLauncher};
use tb_core::EndpointId;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

const SHUTDOWN_FLUSH: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tb=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.resolve_config()?;
    std::fs::create_dir_all(&config.report_dir)?;

    let host = ChannelHost::new(EndpointId::for_controller(std::process::id()));
    let listener = Listener::bind(host.clone(), config.channel_type, &config.listen_address).await?;
    tracing::info!(
        endpoint = %host.endpoint(),
        address = %listener.local_address(),
        channel_type = %config.channel_type,
        worker = %config.worker_path.display(),
        "controller listening"
    );

    let service = ControllerService::new(
        host.clone(),
        Arc::new(ProcessLauncher::new()),
        config,
        listener.local_address(),
    );
    host.install_handler(Arc::new(service.clone()));
    host.sign_in(Capability::Commands).await;
    host.sign_in(Capability::Notifications).await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    if service.session().is_active() {
        service.terminate().await;
    }
    drop(listener);
    host.shutdown(SHUTDOWN_FLUSH).await;
    Ok(())
}

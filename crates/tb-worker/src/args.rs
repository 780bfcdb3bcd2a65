use std::path::PathBuf;

use clap::Parser;
use tb_channel::ChannelType;
use tb_core::EndpointId;

/// Arguments the controller passes when it launches a worker.
#[derive(Debug, Clone, Parser)]
#[command(name = "tb-worker", about = "testbench worker: runs one test case for a controller")]
pub struct WorkerArgs {
    /// Endpoint identity of the controller to serve
    #[arg(long)]
    pub controller: EndpointId,

    /// Transport used to reach the controller (NamedPipe or Tcp)
    #[arg(long = "channel-type")]
    pub channel_type: ChannelType,

    /// Controller address: host:port for Tcp, a socket path for NamedPipe
    #[arg(long)]
    pub address: String,

    /// Log file (defaults to worker.log in the run's scratch directory)
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
}

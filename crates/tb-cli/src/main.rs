mod client;
mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tb_channel::ChannelType;

/// testbench: run test plans on a controller and collect their reports.
#[derive(Parser)]
#[command(name = "tb", version, about)]
struct Cli {
    /// Controller address (host:port for tcp, socket path for named pipes).
    #[arg(long, global = true, env = "TB_CONTROLLER", default_value = "127.0.0.1:7340")]
    controller: String,

    #[arg(long, global = true, env = "TB_CHANNEL_TYPE", default_value = "tcp")]
    channel_type: ChannelType,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a plan file without contacting a controller
    Validate { plan: PathBuf },

    /// Execute a plan and stream its report
    Run {
        plan: PathBuf,
        /// Directory shipped to the worker as the run's test files
        #[arg(long)]
        assets: Option<PathBuf>,
        /// Write the collected report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show the controller's execution state
    Status,

    /// Stop the controller's current run
    Terminate,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color || std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    let target = client::Target {
        address: cli.controller,
        channel_type: cli.channel_type,
    };

    match cli.command {
        Commands::Validate { plan } => commands::validate::run(plan),
        Commands::Run {
            plan,
            assets,
            report,
        } => commands::run::run(target, plan, assets, report),
        Commands::Status => commands::status::run(target),
        Commands::Terminate => commands::terminate::run(target),
    }
}

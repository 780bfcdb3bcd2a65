use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tb_channel::ChannelType;
use tb_controller::ControllerConfig;

#[derive(Debug, Parser)]
#[command(name = "tb-server", about = "testbench controller host")]
pub struct Cli {
    /// Controller configuration file (TOML)
    #[arg(long, env = "TB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on: host:port for Tcp, a socket path for NamedPipe
    #[arg(long, env = "TB_LISTEN_ADDR")]
    pub listen_addr: Option<String>,

    /// Transport workers and clients connect over
    #[arg(long, env = "TB_CHANNEL_TYPE")]
    pub channel_type: Option<ChannelType>,

    /// Worker executable to launch
    #[arg(long, env = "TB_WORKER_PATH")]
    pub worker_path: Option<PathBuf>,

    /// How long a launched worker has to sign on
    #[arg(long, env = "TB_HANDSHAKE_TIMEOUT_MS")]
    pub handshake_timeout_ms: Option<u64>,

    /// Parent directory for per-session scratch directories
    #[arg(long, env = "TB_SCRATCH_ROOT")]
    pub scratch_root: Option<PathBuf>,

    /// Where report files shipped by workers are unpacked
    #[arg(long, env = "TB_REPORT_DIR")]
    pub report_dir: Option<PathBuf>,
}

impl Cli {
    /// Configuration file (or defaults) with command-line overrides applied.
    pub fn resolve_config(&self) -> Result<ControllerConfig> {
        let mut config = match &self.config {
            Some(path) => ControllerConfig::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => ControllerConfig::default(),
        };
        if let Some(v) = &self.listen_addr {
            config.listen_address = v.clone();
        }
        if let Some(v) = self.channel_type {
            config.channel_type = v;
        }
        if let Some(v) = &self.worker_path {
            config.worker_path = v.clone();
        }
        if let Some(v) = self.handshake_timeout_ms {
            config.handshake_timeout_ms = v;
        }
        if let Some(v) = &self.scratch_root {
            config.scratch_root = v.clone();
        }
        if let Some(v) = &self.report_dir {
            config.report_dir = v.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("controller.toml");
        std::fs::write(&file, "listen_address = \"0.0.0.0:9000\"\nhandshake_timeout_ms = 1000\n").unwrap();

        let cli = Cli::try_parse_from([
            "tb-server",
            "--config",
            file.to_str().unwrap(),
            "--handshake-timeout-ms",
            "2500",
        ])
        .unwrap();
        let config = cli.resolve_config().unwrap();
        assert_eq!(config.listen_address, "0.0.0.0:9000");
        assert_eq!(config.handshake_timeout_ms, 2500);
    }

    #[test]
    fn invalid_override_is_rejected() {
        let cli = Cli::try_parse_from(["tb-server", "--handshake-timeout-ms", "0"]).unwrap();
        assert!(cli.resolve_config().is_err());
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tb_channel::ChannelType;

use crate::error::{ControllerError, Result};

pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:7340";
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 60_000;

/// Controller host settings, read from TOML. Missing keys take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub listen_address: String,
    pub channel_type: ChannelType,
    pub worker_path: PathBuf,
    pub handshake_timeout_ms: u64,
    pub scratch_root: PathBuf,
    pub report_dir: PathBuf,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            channel_type: ChannelType::Tcp,
            worker_path: default_worker_path(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            scratch_root: std::env::temp_dir(),
            report_dir: PathBuf::from("./reports"),
        }
    }
}

/// `tb-worker` next to the running executable, else whatever `PATH` finds.
fn default_worker_path() -> PathBuf {
    let name = format!("tb-worker{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
        .unwrap_or_else(|| PathBuf::from(name))
}

impl ControllerConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ControllerError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_address.trim().is_empty() {
            return Err(ControllerError::Config("listen_address is empty".into()));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ControllerError::Config(
                "handshake_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

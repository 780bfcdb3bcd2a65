use std::path::PathBuf;
use std::time::Duration;

use tb_channel::ChannelError;
use tb_core::{EndpointId, TestExecutionState};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("a session is already active (state: {0})")]
    SessionBusy(TestExecutionState),

    #[error("invalid test case: {0}")]
    InvalidPlan(String),

    #[error("failed to start worker {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("worker {endpoint} did not sign on within {} ms", .timeout.as_millis())]
    HandshakeTimeout {
        endpoint: EndpointId,
        timeout: Duration,
    },

    #[error("failed to download test files: {0}")]
    Download(#[source] ChannelError),

    #[error("no worker is associated with the session")]
    NoWorker,

    #[error("no test files are available for transfer")]
    NoTestFiles,

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ControllerError>;

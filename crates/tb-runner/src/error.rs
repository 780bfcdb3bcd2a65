use std::path::PathBuf;

use tb_core::{ReportError, StepKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StepError {
    /// The step was routed to a processor for another kind.
    #[error("{processor} processor cannot run a {step} step")]
    VariantMismatch { processor: StepKind, step: StepKind },

    #[error("step input not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("{0}")]
    Execution(String),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StepError>;

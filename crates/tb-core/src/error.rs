use thiserror::Error;

use crate::report::ReportError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Archive entry escapes the destination: {0}")]
    UnsafeArchivePath(String),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

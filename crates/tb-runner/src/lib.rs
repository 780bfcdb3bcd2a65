//! Worker-side execution engine.
//!
//! The [`Sequencer`] walks a test case in step order, resolving a
//! [`StepProcessor`] for each step through the [`DispatchTable`], applying
//! the step's failure mode and rolling back cleanup-capable steps when a run
//! stops early.

pub mod context;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod sequencer;
pub mod steps;

pub use context::{NoReportTransfer, ReportTransfer, StepContext};
pub use dispatch::DispatchTable;
pub use error::{Result, StepError};
pub use executor::{Executor, Invocation, ProcessOutput, ProcessStatus};
pub use sequencer::{ProgressSink, Sequencer};
pub use steps::{StepCleanup, StepProcessor, ToolConfig};

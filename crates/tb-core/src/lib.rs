pub mod archive;
pub mod error;
pub mod plan;
pub mod report;
pub mod types;

pub use error::{Error, Result};
pub use report::{
    EntryLevel, GroupedSection, ReportEntry, ReportError, ReportSection, TestReport,
    CONTROLLER_SECTION_GROUP, STEP_SECTION_GROUP,
};
pub use types::*;

//! Report sink data model.
//!
//! A [`ReportSection`] collects the timestamped info/warning/error entries
//! written while one step executes. Entries are keyed by timestamp and the
//! keys are kept strictly increasing: an entry stamped at or before the
//! previous one is moved to one nanosecond after it, so nothing is lost and
//! iteration order is insertion order. Once finalized a section is frozen.
//!
//! [`TestReport`] is the ordered collection of sections for a whole run,
//! grouped by the section group name they were reported under.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryLevel {
    Error,
    Warning,
    Info,
}

impl EntryLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Error => "[ERR]",
            Self::Warning => "[WARN]",
            Self::Info => "[INFO]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub level: EntryLevel,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    #[error("report section '{0}' is already finalized")]
    AlreadyFinalized(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    name: String,
    entries: BTreeMap<DateTime<Utc>, ReportEntry>,
    was_successful: bool,
    finalized: bool,
}

impl ReportSection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
            was_successful: false,
            finalized: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&mut self, text: impl Into<String>) -> Result<DateTime<Utc>, ReportError> {
        self.add(EntryLevel::Info, text)
    }

    pub fn warning(&mut self, text: impl Into<String>) -> Result<DateTime<Utc>, ReportError> {
        self.add(EntryLevel::Warning, text)
    }

    pub fn error(&mut self, text: impl Into<String>) -> Result<DateTime<Utc>, ReportError> {
        self.add(EntryLevel::Error, text)
    }

    pub fn add(
        &mut self,
        level: EntryLevel,
        text: impl Into<String>,
    ) -> Result<DateTime<Utc>, ReportError> {
        self.add_at(Utc::now(), level, text)
    }

    /// Add an entry stamped `at`. Returns the key actually used, which is
    /// later than `at` when `at` does not come after the newest entry.
    pub fn add_at(
        &mut self,
        at: DateTime<Utc>,
        level: EntryLevel,
        text: impl Into<String>,
    ) -> Result<DateTime<Utc>, ReportError> {
        if self.finalized {
            return Err(ReportError::AlreadyFinalized(self.name.clone()));
        }
        let key = match self.entries.keys().next_back() {
            Some(last) if at <= *last => *last + TimeDelta::nanoseconds(1),
            _ => at,
        };
        self.entries.insert(
            key,
            ReportEntry {
                level,
                text: text.into(),
            },
        );
        Ok(key)
    }

    /// Freeze the section with its pass/fail flag. A section can only be
    /// finalized once.
    pub fn finalize(&mut self, was_successful: bool) -> Result<(), ReportError> {
        if self.finalized {
            return Err(ReportError::AlreadyFinalized(self.name.clone()));
        }
        self.was_successful = was_successful;
        self.finalized = true;
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn was_successful(&self) -> bool {
        self.was_successful
    }

    pub fn entries(&self) -> impl Iterator<Item = (&DateTime<Utc>, &ReportEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, level: EntryLevel) -> usize {
        self.entries.values().filter(|e| e.level == level).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedSection {
    pub group: String,
    pub section: ReportSection,
}

/// Group of the per-step sections.
pub const STEP_SECTION_GROUP: &str = "Test steps";
/// Group of sections raised by the controller itself (provisioning, crashes).
pub const CONTROLLER_SECTION_GROUP: &str = "Controller";

/// Every section reported during one run, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    sections: Vec<GroupedSection>,
}

impl TestReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, group: impl Into<String>, section: ReportSection) {
        self.sections.push(GroupedSection {
            group: group.into(),
            section,
        });
    }

    pub fn sections(&self) -> &[GroupedSection] {
        &self.sections
    }

    pub fn in_group<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a ReportSection> {
        self.sections
            .iter()
            .filter(move |s| s.group == group)
            .map(|s| &s.section)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn all_successful(&self) -> bool {
        self.sections.iter().all(|s| s.section.was_successful())
    }
}

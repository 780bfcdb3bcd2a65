use serde::Deserialize;
use std::path::PathBuf;

use crate::types::{EnvironmentParameters, StepParameters, TestStep};

// --- TOML deserialization types ---

#[derive(Debug, Clone, Deserialize)]
pub struct PlanFile {
    pub plan: PlanConfig,
    #[serde(default)]
    pub environment: EnvironmentParameters,
    #[serde(default)]
    pub step: Vec<StepConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    pub order: u32,
    pub kind: String,
    #[serde(default)]
    pub failure_mode: Option<String>,
    #[serde(default)]
    pub parameters: StepParameters,
    #[serde(default)]
    pub report_files: Vec<PathBuf>,
    #[serde(default)]
    pub report_directories: Vec<PathBuf>,
    #[serde(default)]
    pub report_includes_system_log: bool,
    #[serde(default)]
    pub executable: Option<PathBuf>,
    #[serde(default)]
    pub installer: Option<PathBuf>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub script: Option<PathBuf>,
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default)]
    pub destination: Option<PathBuf>,
}

// --- Resolved types (post-parsing) ---

#[derive(Debug, Clone, PartialEq)]
pub struct TestPlan {
    pub name: String,
    pub environment: EnvironmentParameters,
    pub steps: Vec<TestStep>,
}

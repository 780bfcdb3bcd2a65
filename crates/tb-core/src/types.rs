use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

// ── Parameter maps ──
pub type EnvironmentParameters = IndexMap<String, String>;
pub type StepParameters = IndexMap<String, String>;

// ── EndpointId ──

/// Opaque identity of a participant on the channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity of the worker running as process `pid`. The controller and
    /// the worker both derive it from the pid, so neither has to announce it.
    pub fn for_worker(pid: u32) -> Self {
        Self(format!("worker-{pid}"))
    }

    pub fn for_controller(pid: u32) -> Self {
        Self(format!("controller-{pid}"))
    }

    pub fn for_client() -> Self {
        Self(format!("client-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EndpointId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("endpoint identity must not be empty".to_string());
        }
        if s.chars().any(char::is_whitespace) {
            return Err(format!("endpoint identity contains whitespace: '{s}'"));
        }
        Ok(Self(s.to_string()))
    }
}

// ── UploadToken ──

/// Capability handed out by an upload broker for one registered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadToken(Uuid);

impl UploadToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for UploadToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UploadToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| format!("invalid upload token '{s}': {e}"))
    }
}

// ── FailureMode ──
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailureMode {
    /// Record the failure and move on to the next step.
    Continue,
    /// Roll back the executed steps and end the run.
    #[default]
    Stop,
}

impl std::fmt::Display for FailureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Continue => "continue",
            Self::Stop => "stop",
        };
        write!(f, "{s}")
    }
}

impl FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "stop" => Ok(Self::Stop),
            other => Err(format!("unknown FailureMode: {other}")),
        }
    }
}

// ── Execution state and result ──
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TestExecutionState {
    NotStarted,
    Running,
    Passed,
    Failed,
    Crashed,
    /// Idle. Also the resting state once a run is over.
    #[default]
    None,
}

impl TestExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Crashed => "crashed",
            Self::None => "idle",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Crashed)
    }
}

impl std::fmt::Display for TestExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestExecutionResult {
    Passed,
    Failed,
}

impl TestExecutionResult {
    /// Folds step states into a session result: any Failed or Crashed step
    /// fails the session.
    pub fn fold<I>(states: I) -> Self
    where
        I: IntoIterator<Item = TestExecutionState>,
    {
        if states.into_iter().any(|s| s.is_failure()) {
            Self::Failed
        } else {
            Self::Passed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }
}

impl From<TestExecutionResult> for TestExecutionState {
    fn from(result: TestExecutionResult) -> Self {
        match result {
            TestExecutionResult::Passed => Self::Passed,
            TestExecutionResult::Failed => Self::Failed,
        }
    }
}

impl std::fmt::Display for TestExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Step variants ──
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptLanguage {
    PowerShell,
    Shell,
    Python,
}

impl std::fmt::Display for ScriptLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PowerShell => "powershell",
            Self::Shell => "shell",
            Self::Python => "python",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ScriptLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "powershell" | "pwsh" => Ok(Self::PowerShell),
            "shell" | "sh" => Ok(Self::Shell),
            "python" => Ok(Self::Python),
            other => Err(format!("unknown ScriptLanguage: {other}")),
        }
    }
}

/// Variant-specific part of a [`TestStep`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepDetails {
    Console {
        executable: PathBuf,
    },
    Installer {
        installer: PathBuf,
    },
    Script {
        language: ScriptLanguage,
        script: PathBuf,
    },
    FileCopy {
        source: PathBuf,
        destination: PathBuf,
    },
    /// A step kind this build does not know. It is carried through so the
    /// worker can report it instead of silently dropping it.
    Unsupported {
        name: String,
    },
}

impl StepDetails {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Console { .. } => StepKind::Console,
            Self::Installer { .. } => StepKind::Installer,
            Self::Script { .. } => StepKind::Script,
            Self::FileCopy { .. } => StepKind::FileCopy,
            Self::Unsupported { .. } => StepKind::Unsupported,
        }
    }
}

/// Fieldless tag of [`StepDetails`], used as the dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    Console,
    Installer,
    Script,
    FileCopy,
    Unsupported,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Console => "console",
            Self::Installer => "installer",
            Self::Script => "script",
            Self::FileCopy => "file-copy",
            Self::Unsupported => "unsupported",
        };
        write!(f, "{s}")
    }
}

// ── TestStep ──
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStep {
    /// Position in the plan. Positive and unique within a plan.
    pub order: u32,
    #[serde(default)]
    pub failure_mode: FailureMode,
    #[serde(default)]
    pub parameters: StepParameters,
    #[serde(default)]
    pub report_files: Vec<PathBuf>,
    #[serde(default)]
    pub report_directories: Vec<PathBuf>,
    #[serde(default)]
    pub report_includes_system_log: bool,
    pub details: StepDetails,
}

impl TestStep {
    pub fn new(order: u32, details: StepDetails) -> Self {
        Self {
            order,
            failure_mode: FailureMode::default(),
            parameters: StepParameters::new(),
            report_files: Vec::new(),
            report_directories: Vec::new(),
            report_includes_system_log: false,
            details,
        }
    }

    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> StepKind {
        self.details.kind()
    }

    /// Name used for the step's report section, e.g. `Step 2 (console)`.
    pub fn display_name(&self) -> String {
        format!("Step {} ({})", self.order, self.kind())
    }

    pub fn has_report_artifacts(&self) -> bool {
        !self.report_files.is_empty()
            || !self.report_directories.is_empty()
            || self.report_includes_system_log
    }
}

// ── Worker exit codes ──
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExitCode {
    Passed,
    UnhandledFault,
    Failed,
    Terminated,
    Configuration,
}

impl WorkerExitCode {
    pub fn code(self) -> i32 {
        match self {
            Self::Passed => 0,
            Self::UnhandledFault => 1,
            Self::Failed => 2,
            Self::Terminated => 3,
            Self::Configuration => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Passed),
            1 => Some(Self::UnhandledFault),
            2 => Some(Self::Failed),
            3 => Some(Self::Terminated),
            4 => Some(Self::Configuration),
            _ => None,
        }
    }

    pub fn for_result(result: TestExecutionResult) -> Self {
        match result {
            TestExecutionResult::Passed => Self::Passed,
            TestExecutionResult::Failed => Self::Failed,
        }
    }
}

pub mod process;

use std::path::PathBuf;
use std::time::Duration;

pub use process::ProcessExecutor;

/// Default upper bound for a single process launched by a step.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// One process launch.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    pub timeout: Duration,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: work_dir.into(),
            timeout: DEFAULT_TIMEOUT,
            env: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Human-readable command line for report entries.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Exited with this code.
    Exited(i32),
    /// Ended without an exit code (killed by a signal).
    Killed,
    TimedOut,
}

impl ProcessStatus {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ProcessStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Launches processes for step processors. A launch that cannot start at
/// all is an `Err`; everything after the start is described by the output.
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<ProcessOutput>;
}

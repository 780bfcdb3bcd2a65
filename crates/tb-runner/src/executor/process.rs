use std::process::Stdio;
use std::time::Instant;

use tracing::{debug, warn};

use super::{Executor, Invocation, ProcessOutput, ProcessStatus};

pub struct ProcessExecutor;

impl ProcessExecutor {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Executor for ProcessExecutor {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<ProcessOutput> {
        let start = Instant::now();
        let mut cmd = tokio::process::Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&invocation.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the output future on timeout must not leave the child behind.
            .kill_on_drop(true);
        for (k, v) in &invocation.env {
            cmd.env(k, v);
        }

        debug!(command = %invocation.command_line(), "spawning process");
        let child = cmd.spawn()?;
        let result = tokio::time::timeout(invocation.timeout, child.wait_with_output()).await;
        let duration = start.elapsed();
        match result {
            Ok(output) => {
                let output = output?;
                let status = match output.status.code() {
                    Some(code) => ProcessStatus::Exited(code),
                    None => ProcessStatus::Killed,
                };
                Ok(ProcessOutput {
                    status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    duration,
                })
            }
            Err(_) => {
                warn!(
                    command = %invocation.command_line(),
                    timeout_secs = invocation.timeout.as_secs(),
                    "process timed out"
                );
                Ok(ProcessOutput {
                    status: ProcessStatus::TimedOut,
                    stdout: String::new(),
                    stderr: format!("process timed out after {}s", invocation.timeout.as_secs()),
                    duration,
                })
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> Invocation {
        Invocation::new("sh", std::env::temp_dir()).args(["-c", script])
    }

    #[tokio::test]
    async fn test_echo_passes() {
        let out = ProcessExecutor::new().run(&sh("echo hello")).await.unwrap();
        assert!(out.status.success());
        assert!(out.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_exit_code_is_reported() {
        let out = ProcessExecutor::new().run(&sh("echo oops >&2; exit 3")).await.unwrap();
        assert_eq!(out.status, ProcessStatus::Exited(3));
        assert!(out.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let invocation = sh("sleep 10").timeout(Duration::from_millis(100));
        let out = ProcessExecutor::new().run(&invocation).await.unwrap();
        assert_eq!(out.status, ProcessStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_env_injection() {
        let mut invocation = sh("echo $TB_TEST_VALUE");
        invocation.env.push(("TB_TEST_VALUE".into(), "yes".into()));
        let out = ProcessExecutor::new().run(&invocation).await.unwrap();
        assert!(out.stdout.contains("yes"));
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let invocation = Invocation::new("/definitely/not/here", std::env::temp_dir());
        assert!(ProcessExecutor::new().run(&invocation).await.is_err());
    }
}

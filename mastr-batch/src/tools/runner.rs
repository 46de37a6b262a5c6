//! Subprocess runner shared by the tool adapters
//!
//! Every call runs under a per-call timeout and the run's cancellation token.
//! Children are spawned with `kill_on_drop`, so abandoning the wait on
//! timeout or cancellation also kills the process.

use super::ToolError;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Captured process output
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs external binaries
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `program` with `args`, failing on non-zero exit
    pub async fn run(
        &self,
        program: &Path,
        args: &[OsString],
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let tool = tool_name(program);
        let started = Instant::now();

        tracing::debug!(tool = %tool, args = ?args, "Launching external tool");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    ToolError::NotFound { tool: tool.clone() }
                } else {
                    ToolError::Spawn {
                        tool: tool.clone(),
                        source,
                    }
                }
            })?;

        let output = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::warn!(tool = %tool, "Cancelling external tool");
                return Err(ToolError::Cancelled { tool });
            }
            _ = tokio::time::sleep(self.timeout) => {
                tracing::warn!(tool = %tool, timeout_secs = self.timeout.as_secs(), "External tool timed out");
                return Err(ToolError::Timeout { tool, secs: self.timeout.as_secs() });
            }
            output = child.wait_with_output() => output.map_err(|source| ToolError::Spawn {
                tool: tool.clone(),
                source,
            })?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        tracing::debug!(
            tool = %tool,
            exit_code = ?output.status.code(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "External tool exited"
        );

        if !output.status.success() {
            return Err(ToolError::Failed {
                tool,
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(ToolOutput { stdout, stderr })
    }
}

fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| program.display().to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let runner = CommandRunner::new(Duration::from_secs(5));
        let output = runner
            .run(Path::new("sh"), &args(&["-c", "echo 120.00 bpm"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "120.00 bpm");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let runner = CommandRunner::new(Duration::from_secs(5));
        let err = runner
            .run(Path::new("sh"), &args(&["-c", "echo boom >&2; exit 3"]), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ToolError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let runner = CommandRunner::new(Duration::from_secs(5));
        let err = runner
            .run(Path::new("mastr-no-such-tool"), &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills() {
        let runner = CommandRunner::new(Duration::from_millis(100));
        let err = runner
            .run(Path::new("sleep"), &args(&["5"]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_reaches_process() {
        let runner = CommandRunner::new(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = runner
            .run(Path::new("sleep"), &args(&["5"]), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled { .. }));
    }
}

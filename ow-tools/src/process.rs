//! The command-execution boundary: `git`, `gh`, `bun` and `npm` are reached only
//! through a [`CommandRunner`], so executors can be exercised against fakes.

use crate::error::{Result, ToolError};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const STDERR_BYTES_MAX: usize = 4_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// `true` when the command line starts with `program args[0] args[1] ...`.
    pub fn starts_with(&self, program: &str, args: &[&str]) -> bool {
        self.program == program
            && self.args.len() >= args.len()
            && self.args.iter().zip(args).all(|(a, b)| a == b)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and return stdout. A non-zero exit is an error whose
    /// message carries stderr, so transient signatures stay visible to retry.
    async fn run(&self, invocation: &Invocation) -> Result<String>;
}

/// Spawns real processes in a fixed working directory.
pub struct ProcessRunner {
    workdir: PathBuf,
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(workdir: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.as_ref().to_path_buf(),
            timeout,
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    #[tracing::instrument(level = "debug", skip_all, fields(program = %invocation.program))]
    async fn run(&self, invocation: &Invocation) -> Result<String> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&self.workdir)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ToolError::ExecutionFailed(format!("failed to spawn {}: {e}", invocation.program))
        })?;

        let stdin = match invocation.stdin.as_deref() {
            Some(input) => match child.stdin.take() {
                Some(pipe) => Some((pipe, input)),
                None => return Err(ToolError::ExecutionFailed("stdin was not piped".to_string())),
            },
            None => None,
        };
        let finished = async move {
            if let Some((mut pipe, input)) = stdin {
                pipe.write_all(input.as_bytes()).await?;
                // Dropping the handle closes stdin so the child sees EOF.
                drop(pipe);
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, finished)
            .await
            .map_err(|_| {
                ToolError::ExecutionFailed(format!(
                    "`{invocation}` timed out after {}s (timeout)",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            tracing::debug!(stdout_len = stdout.len(), "command succeeded");
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        let detail: String = detail.chars().take(STDERR_BYTES_MAX).collect();
        let code = output.status.code().unwrap_or(-1);
        tracing::debug!(exit_code = code, "command failed");
        Err(ToolError::ExecutionFailed(format!(
            "`{invocation}` exited with code {code}: {detail}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> (tempfile::TempDir, ProcessRunner) {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(dir.path(), Duration::from_secs(5));
        (dir, runner)
    }

    #[tokio::test]
    async fn captures_stdout_in_workdir() {
        let (dir, runner) = runner();
        std::fs::write(dir.path().join("marker.txt"), "present").unwrap();
        let out = runner
            .run(&Invocation::new("sh", ["-c", "cat marker.txt"]))
            .await
            .unwrap();
        assert_eq!(out, "present");
    }

    #[tokio::test]
    async fn feeds_stdin() {
        let (_dir, runner) = runner();
        let out = runner
            .run(&Invocation::new("cat", Vec::<String>::new()).with_stdin("{\"body\":\"hi\"}"))
            .await
            .unwrap();
        assert_eq!(out, "{\"body\":\"hi\"}");
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let (_dir, runner) = runner();
        let err = runner
            .run(&Invocation::new("sh", ["-c", "echo 'HTTP 503' >&2; exit 3"]))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exited with code 3"), "{msg}");
        assert!(msg.contains("HTTP 503"), "{msg}");
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(dir.path(), Duration::from_millis(100));
        let err = runner
            .run(&Invocation::new("sleep", ["5"]))
            .await
            .unwrap_err();
        assert!(crate::retry::is_transient_message(&err.to_string()));
    }

    #[tokio::test]
    async fn unread_stdin_still_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(dir.path(), Duration::from_millis(200));
        // Larger than any pipe buffer, so the write blocks while `sleep` runs.
        let payload = "x".repeat(4 * 1024 * 1024);
        let started = std::time::Instant::now();
        let err = runner
            .run(&Invocation::new("sleep", ["5"]).with_stdin(payload))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let inv = Invocation::new("git", ["commit", "-m", "[skip ci] docs: update"]);
        assert_eq!(inv.to_string(), "git commit -m \"[skip ci] docs: update\"");
        assert!(inv.starts_with("git", &["commit"]));
        assert!(!inv.starts_with("gh", &["commit"]));
    }
}

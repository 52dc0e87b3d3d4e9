//! Submitter that runs the external submission tool as a child process.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::errors::SubmitError;
use crate::traits::{SubmissionOutput, Submitter};

/// Runs `argv[0]` with the remaining arguments and waits for it to exit.
///
/// Stdout and stderr are captured. Output is logged but not interpreted;
/// only the exit code decides success.
#[derive(Debug, Clone, Default)]
pub struct CommandSubmitter;

impl CommandSubmitter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Submitter for CommandSubmitter {
    async fn submit(&self, argv: &[String]) -> Result<SubmissionOutput, SubmitError> {
        let (program, args) = argv.split_first().ok_or(SubmitError::EmptyCommand)?;

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SubmitError::Spawn {
                program: program.clone(),
                source,
            })?;

        let result = SubmissionOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).replace("\r\n", "\n"),
            stderr: String::from_utf8_lossy(&output.stderr).replace("\r\n", "\n"),
        };

        for line in result.stdout.lines().filter(|l| !l.trim().is_empty()) {
            tracing::debug!(program = %program, "{line}");
        }
        if !result.success() && !result.stderr.trim().is_empty() {
            tracing::warn!(
                program = %program,
                exit_code = ?result.exit_code,
                stderr = %result.stderr.trim(),
                "submission tool failed"
            );
        }

        Ok(result)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let out = CommandSubmitter
            .submit(&argv(&["sh", "-c", "echo submitted; exit 0"]))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "submitted\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_not_an_error() {
        let out = CommandSubmitter
            .submit(&argv(&["sh", "-c", "echo nope >&2; exit 3"]))
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stderr, "nope\n");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let err = CommandSubmitter
            .submit(&argv(&["/definitely/not/a/real/submit-tool", "submit"]))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_empty_command() {
        let err = CommandSubmitter.submit(&[]).await.unwrap_err();
        assert!(matches!(err, SubmitError::EmptyCommand));
    }
}

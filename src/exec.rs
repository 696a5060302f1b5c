//! Subprocess invocation used by the guest-property transport.

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use crate::error::{Error, Result};

/// Captured output of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Run `argv` to completion. A non-zero exit yields [`Error::Exec`]
    /// carrying the exit code and both output streams.
    async fn run(&self, argv: &[String]) -> Result<ExecOutput>;
}

/// Runs commands as child processes of the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioExecutor;

#[async_trait]
impl ProcessExecutor for TokioExecutor {
    async fn run(&self, argv: &[String]) -> Result<ExecOutput> {
        let (program, args) = argv.split_first().ok_or_else(|| Error::Exec {
            tool: String::new(),
            code: None,
            stdout: String::new(),
            stderr: "empty command line".to_string(),
        })?;
        debug!("exec: {:?}", argv);

        let output = Command::new(program).args(args).output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(Error::Exec {
                tool: program.clone(),
                code: output.status.code(),
                stdout,
                stderr,
            });
        }
        Ok(ExecOutput { stdout, stderr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let out = TokioExecutor
            .run(&argv(&["sh", "-c", "printf 'Value: hello'"]))
            .await
            .unwrap();
        assert_eq!(out.stdout, "Value: hello");
    }

    #[tokio::test]
    async fn test_run_non_zero_exit_carries_stderr() {
        let err = TokioExecutor
            .run(&argv(&["sh", "-c", "printf 'No value set!' >&2; exit 2"]))
            .await
            .unwrap_err();
        match err {
            Error::Exec { code, stderr, .. } => {
                assert_eq!(code, Some(2));
                assert_eq!(stderr, "No value set!");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_non_zero_exit_keeps_stdout() {
        let err = TokioExecutor
            .run(&argv(&["sh", "-c", "echo 'No value set!'; exit 1"]))
            .await
            .unwrap_err();
        match err {
            Error::Exec { stdout, stderr, .. } => {
                assert_eq!(stdout, "No value set!\n");
                assert!(stderr.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_empty_argv() {
        assert!(TokioExecutor.run(&[]).await.is_err());
    }
}

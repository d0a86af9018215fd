//! Bounded invocation of external programs (ping, nmcli, netsh, networksetup).

use anyhow::{Context, Result, anyhow};
use log::debug;
use std::{
    ffi::OsStr,
    process::{Output, Stdio},
    time::Duration,
};
use tokio::{process::Command, time::timeout};

/// A program together with its arguments
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub program: &'static str,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new<I, S>(program: &'static str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Run the command, killing it if it is still running after `limit`
    pub async fn run(&self, limit: Duration) -> Result<Output> {
        run_command(self.program, &self.args, limit).await
    }
}

/// Run a program to completion and capture its output
///
/// The child is killed when it outlives `limit`, so a hanging tool never
/// stalls the caller beyond that bound.
pub async fn run_command<I, S>(program: &str, args: I, limit: Duration) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null()).kill_on_drop(true);

    debug!("run {command:?}");

    timeout(limit, command.output())
        .await
        .map_err(|_| anyhow!("{program} timed out after {}s", limit.as_secs()))?
        .context(format!("failed to run {program}"))
}

/// Human readable reason of a failed invocation
pub fn diagnostic(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);

    [stderr.trim(), stdout.trim()]
        .into_iter()
        .find(|text| !text.is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("exited with {}", output.status))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_output() {
        let output = CommandLine::new("sh", ["-c", "echo hello"])
            .run(Duration::from_secs(5))
            .await
            .unwrap();

        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn times_out_hanging_program() {
        let err = run_command("sleep", ["5"], Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn fails_for_missing_program() {
        let result = run_command(
            "netchange-definitely-missing-binary",
            [] as [&str; 0],
            Duration::from_secs(1),
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn diagnostic_prefers_stderr() {
        let output = run_command(
            "sh",
            ["-c", "echo out; echo err >&2; exit 3"],
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(!output.status.success());
        assert_eq!(diagnostic(&output), "err");
    }

    #[tokio::test]
    async fn diagnostic_falls_back_to_exit_status() {
        let output = run_command("sh", ["-c", "exit 2"], Duration::from_secs(5))
            .await
            .unwrap();

        assert!(diagnostic(&output).contains("exit"));
    }
}

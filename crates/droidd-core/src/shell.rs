//! Shell executor
//!
//! Runs device shell commands, optionally through the privileged shell
//! (`su -c`). Also probes the runtime capabilities the resolver tracks.

use std::process::Stdio;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, warn};

/// Default command timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of one shell invocation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ShellResult {
    pub fn ok(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes shell lines on the device
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    /// Whether `su` was probed as usable
    privileged_available: bool,
}

impl ShellExecutor {
    pub fn new(privileged_available: bool) -> Self {
        ShellExecutor {
            privileged_available,
        }
    }

    pub fn privileged_available(&self) -> bool {
        self.privileged_available
    }

    /// Run a shell line. With `privileged` the line goes through `su -c`;
    /// the caller is expected to have checked availability first.
    pub async fn run(&self, line: &str, privileged: bool) -> Result<ShellResult> {
        self.run_with_timeout(line, privileged, DEFAULT_TIMEOUT).await
    }

    pub async fn run_with_timeout(
        &self,
        line: &str,
        privileged: bool,
        timeout: Duration,
    ) -> Result<ShellResult> {
        let mut cmd = if privileged {
            let mut c = Command::new("su");
            c.arg("-c").arg(line);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(line);
            c
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(privileged, "shell: {}", line);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| anyhow::anyhow!("shell command timed out after {:?}: {}", timeout, line))??;

        Ok(ShellResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Read a system property (`getprop`), empty string when unset
    pub async fn getprop(&self, name: &str) -> String {
        match self.run(&format!("getprop {}", name), false).await {
            Ok(r) if r.ok() => r.stdout.trim().to_string(),
            _ => String::new(),
        }
    }

    /// Probe whether a usable privileged shell exists
    pub async fn probe_privileged() -> bool {
        let mut cmd = Command::new("su");
        cmd.arg("-c")
            .arg("id -u")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        match tokio::time::timeout(Duration::from_secs(3), cmd.output()).await {
            Ok(Ok(output)) => {
                let uid = String::from_utf8_lossy(&output.stdout);
                output.status.success() && uid.trim() == "0"
            }
            _ => {
                warn!("Privileged shell probe failed or timed out");
                false
            }
        }
    }

    /// Platform API level from `ro.build.version.sdk`, 0 when unreadable
    pub async fn probe_api_level(&self) -> u32 {
        self.getprop("ro.build.version.sdk")
            .await
            .parse()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_output() {
        let shell = ShellExecutor::new(false);
        let result = shell.run("echo hello", false).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "hello");
        assert!(result.ok());
    }

    #[tokio::test]
    async fn test_run_nonzero_exit() {
        let shell = ShellExecutor::new(false);
        let result = shell.run("exit 3", false).await.unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(!result.ok());
    }

    #[tokio::test]
    async fn test_stderr_captured() {
        let shell = ShellExecutor::new(false);
        let result = shell.run("echo oops 1>&2", false).await.unwrap();
        assert_eq!(result.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_timeout() {
        let shell = ShellExecutor::new(false);
        let err = shell
            .run_with_timeout("sleep 5", false, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_shell_result_wire_names() {
        let result = ShellResult {
            exit_code: 0,
            stdout: "out".into(),
            stderr: String::new(),
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"exitCode\":0"));
    }
}

//! `app.*` handlers: lifecycle, install/uninstall, package queries,
//! permissions

use std::sync::Arc;
use std::time::{Duration, Instant};

use droidd_proto::{error, AgentError};
use regex::Regex;
use serde_json::{json, Value};

use crate::router::{CommandHandler, RequestContext};
use crate::shell::ShellResult;

use super::{bool_param, require_str, str_param, u64_param, HandlerDeps};

/// Settle ceiling for waitForIdle after launch
const LAUNCH_SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

struct AppHandler {
    deps: Arc<HandlerDeps>,
    method: &'static str,
}

pub async fn register(deps: &Arc<HandlerDeps>) {
    for method in [
        "app.launch",
        "app.stop",
        "app.clear",
        "app.install",
        "app.uninstall",
        "app.list",
        "app.info",
        "app.permissions",
    ] {
        deps.router
            .register(Arc::new(AppHandler {
                deps: deps.clone(),
                method,
            }))
            .await;
    }
}

#[async_trait::async_trait]
impl CommandHandler for AppHandler {
    fn method(&self) -> &str {
        self.method
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        let needs_package = matches!(
            self.method,
            "app.launch" | "app.stop" | "app.clear" | "app.uninstall" | "app.info"
                | "app.permissions"
        );
        if needs_package && params.get("packageName").and_then(|v| v.as_str()).is_none() {
            return Err("missing 'packageName' parameter".to_string());
        }
        if self.method == "app.install" && params.get("path").and_then(|v| v.as_str()).is_none() {
            return Err("missing 'path' parameter".to_string());
        }
        Ok(())
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        match self.method {
            "app.launch" => self.launch(params).await,
            "app.stop" => self.stop(params).await,
            "app.clear" => self.clear(params).await,
            "app.install" => self.install(params).await,
            "app.uninstall" => self.uninstall(params).await,
            "app.list" => self.list(params).await,
            "app.info" => self.info(params).await,
            "app.permissions" => self.permissions(params).await,
            _ => Err(AgentError::not_implemented(self.method)),
        }
    }
}

impl AppHandler {
    async fn run(&self, command: &str) -> Result<ShellResult, AgentError> {
        self.deps
            .shell
            .run(command, false)
            .await
            .map_err(|e| AgentError::internal(e.to_string()))
    }

    async fn launch(&self, params: Value) -> Result<Value, AgentError> {
        let package = require_str(&params, "packageName")?;
        let activity = str_param(&params, "activity");
        let clear_state = bool_param(&params, "clearState", false);
        let wait_for_idle = bool_param(&params, "waitForIdle", true);
        let timeout_ms = u64_param(&params, "timeoutMs", 20_000);

        if clear_state {
            let result = self.run(&format!("pm clear {}", package)).await?;
            if !result.ok() {
                return Err(AgentError::new(
                    error::APP_NOT_INSTALLED,
                    format!("pm clear failed: {}", result.stderr.trim()),
                ));
            }
        }

        let started = Instant::now();
        let command = match &activity {
            Some(activity) => format!("am start -W -n {}/{}", package, activity),
            None => format!(
                "monkey -p {} -c android.intent.category.LAUNCHER 1",
                package
            ),
        };
        let result = self.run(&command).await?;
        let output = format!("{}{}", result.stdout, result.stderr);
        if !result.ok() || output.contains("Error") || output.contains("No activities found") {
            return Err(AgentError::new(
                error::APP_NOT_INSTALLED,
                format!("launch failed for {}: {}", package, first_line(&output)),
            ));
        }

        if wait_for_idle {
            let deadline = started + LAUNCH_SETTLE_TIMEOUT.min(Duration::from_millis(timeout_ms));
            loop {
                if self.is_foreground(&package).await {
                    break;
                }
                if Instant::now() >= deadline {
                    return Err(AgentError::new(
                        error::LAUNCH_TIMEOUT,
                        format!("{} did not reach the foreground in time", package),
                    ));
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }

        // am start -W reports its own TotalTime; fall back to wall clock
        let launch_time_ms = parse_total_time(&result.stdout)
            .unwrap_or_else(|| started.elapsed().as_millis() as u64);
        self.deps.bus.emit(crate::event_bus::BusEvent::new(
            "app.launched",
            "core",
            json!({ "packageName": package, "launchTimeMs": launch_time_ms }),
        ));
        Ok(json!({
            "launchTimeMs": launch_time_ms,
            "packageName": package,
        }))
    }

    async fn is_foreground(&self, package: &str) -> bool {
        match self.run("dumpsys activity activities").await {
            Ok(result) if result.ok() => {
                let re = Regex::new(r"(mResumedActivity|mFocusedApp|topResumedActivity).*")
                    .expect("static regex");
                let matched = re.find_iter(&result.stdout)
                    .any(|m| m.as_str().contains(package));
                matched
            }
            _ => false,
        }
    }

    async fn stop(&self, params: Value) -> Result<Value, AgentError> {
        let package = require_str(&params, "packageName")?;
        let force = bool_param(&params, "force", true);
        let command = if force {
            format!("am force-stop {}", package)
        } else {
            format!("am kill {}", package)
        };
        let result = self.run(&command).await?;
        Ok(json!({ "success": result.ok() }))
    }

    async fn clear(&self, params: Value) -> Result<Value, AgentError> {
        let package = require_str(&params, "packageName")?;
        let result = self.run(&format!("pm clear {}", package)).await?;
        let success = result.ok() && result.stdout.contains("Success");
        Ok(json!({ "success": success, "output": result.stdout.trim() }))
    }

    async fn install(&self, params: Value) -> Result<Value, AgentError> {
        let path = require_str(&params, "path")?;
        let mut command = String::from("pm install");
        if bool_param(&params, "replace", true) {
            command.push_str(" -r");
        }
        if bool_param(&params, "grantPermissions", false) {
            command.push_str(" -g");
        }
        command.push(' ');
        command.push_str(&path);

        let result = self.run(&command).await?;
        let output = format!("{}{}", result.stdout, result.stderr);
        if !result.ok() || output.contains("Failure") {
            return Err(AgentError::new(
                error::INSTALL_FAILED,
                format!("install failed: {}", first_line(output.trim())),
            ));
        }
        Ok(json!({ "success": true, "output": output.trim() }))
    }

    async fn uninstall(&self, params: Value) -> Result<Value, AgentError> {
        let package = require_str(&params, "packageName")?;
        let result = self.run(&format!("pm uninstall {}", package)).await?;
        let success = result.ok() && result.stdout.contains("Success");
        Ok(json!({ "success": success, "output": result.stdout.trim() }))
    }

    async fn list(&self, params: Value) -> Result<Value, AgentError> {
        let mut command = String::from("pm list packages");
        if let Some(filter) = str_param(&params, "filter") {
            match filter.as_str() {
                "system" => command.push_str(" -s"),
                "third_party" => command.push_str(" -3"),
                other => {
                    command.push(' ');
                    command.push_str(other);
                }
            }
        }
        let result = self.run(&command).await?;
        let packages: Vec<&str> = result
            .stdout
            .lines()
            .filter_map(|line| line.strip_prefix("package:"))
            .map(str::trim)
            .collect();
        let count = packages.len();
        Ok(json!({ "packages": packages, "count": count }))
    }

    async fn info(&self, params: Value) -> Result<Value, AgentError> {
        let package = require_str(&params, "packageName")?;
        let result = self.run(&format!("dumpsys package {}", package)).await?;
        let info = parse_package_dump(&result.stdout).ok_or_else(|| {
            AgentError::new(
                error::APP_NOT_INSTALLED,
                format!("App not installed: {}", package),
            )
        })?;

        let running = self
            .run(&format!("pidof {}", package))
            .await
            .map(|r| r.ok() && !r.stdout.trim().is_empty())
            .unwrap_or(false);

        Ok(json!({
            "packageName": package,
            "versionName": info.version_name,
            "versionCode": info.version_code,
            "isRunning": running,
            "running": running,
            "installTimes": {
                "firstInstallTime": info.first_install_time,
                "lastUpdateTime": info.last_update_time,
            },
        }))
    }

    async fn permissions(&self, params: Value) -> Result<Value, AgentError> {
        let package = require_str(&params, "packageName")?;

        let as_list = |value: Option<&Value>| -> Vec<String> {
            match value {
                Some(Value::String(s)) => vec![s.clone()],
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                _ => Vec::new(),
            }
        };

        let grant = as_list(params.get("grant"));
        let revoke = as_list(params.get("revoke"));

        if grant.is_empty() && revoke.is_empty() {
            let result = self.run(&format!("dumpsys package {}", package)).await?;
            let permissions = parse_permissions(&result.stdout);
            return Ok(json!({ "permissions": permissions }));
        }

        let mut granted = Vec::new();
        let mut revoked = Vec::new();
        for permission in grant {
            let result = self
                .run(&format!("pm grant {} {}", package, permission))
                .await?;
            if result.ok() {
                granted.push(permission);
            }
        }
        for permission in revoke {
            let result = self
                .run(&format!("pm revoke {} {}", package, permission))
                .await?;
            if result.ok() {
                revoked.push(permission);
            }
        }
        Ok(json!({ "granted": granted, "revoked": revoked }))
    }
}

struct PackageInfo {
    version_name: String,
    version_code: u64,
    first_install_time: String,
    last_update_time: String,
}

/// Extract the interesting fields from `dumpsys package`; None when the
/// package section is absent
fn parse_package_dump(text: &str) -> Option<PackageInfo> {
    let version_name = capture(text, r"versionName=(\S+)")?;
    let version_code = capture(text, r"versionCode=(\d+)")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let first_install_time = capture(text, r"firstInstallTime=(.+)").unwrap_or_default();
    let last_update_time = capture(text, r"lastUpdateTime=(.+)").unwrap_or_default();
    Some(PackageInfo {
        version_name,
        version_code,
        first_install_time: first_install_time.trim().to_string(),
        last_update_time: last_update_time.trim().to_string(),
    })
}

/// `permission: granted=` pairs from a package dump
fn parse_permissions(text: &str) -> Vec<Value> {
    let re = Regex::new(r"([\w.]+): granted=(true|false)").expect("static regex");
    re.captures_iter(text)
        .map(|cap| json!({ "name": &cap[1], "granted": &cap[2] == "true" }))
        .collect()
}

fn parse_total_time(text: &str) -> Option<u64> {
    capture(text, r"TotalTime:\s*(\d+)").and_then(|v| v.parse().ok())
}

fn capture(text: &str, pattern: &str) -> Option<String> {
    Regex::new(pattern)
        .ok()?
        .captures(text)
        .map(|cap| cap[1].to_string())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_total_time() {
        let output = "\
Starting: Intent { cmp=com.example.app/.MainActivity }
Status: ok
LaunchState: COLD
TotalTime: 843
WaitTime: 851
Complete";
        assert_eq!(parse_total_time(output), Some(843));
        assert_eq!(parse_total_time("no time here"), None);
    }

    #[test]
    fn test_parse_package_dump() {
        let dump = "\
Packages:
  Package [com.example.app] (aaaa):
    userId=10123
    versionCode=42 minSdk=26 targetSdk=34
    versionName=1.2.3
    firstInstallTime=2024-01-15 10:00:00
    lastUpdateTime=2024-06-01 12:30:00
";
        let info = parse_package_dump(dump).unwrap();
        assert_eq!(info.version_name, "1.2.3");
        assert_eq!(info.version_code, 42);
        assert_eq!(info.first_install_time, "2024-01-15 10:00:00");
        assert!(parse_package_dump("Unable to find package").is_none());
    }

    #[test]
    fn test_parse_permissions() {
        let dump = "\
    requested permissions:
      android.permission.INTERNET: granted=true
      android.permission.CAMERA: granted=false
";
        let permissions = parse_permissions(dump);
        assert_eq!(permissions.len(), 2);
        assert_eq!(permissions[0]["name"], "android.permission.INTERNET");
        assert_eq!(permissions[0]["granted"], true);
        assert_eq!(permissions[1]["granted"], false);
    }

    #[test]
    fn test_first_line() {
        assert_eq!(first_line("a\nb\nc"), "a");
        assert_eq!(first_line(""), "");
    }
}

//! `system.*` handlers: capabilities, heartbeat, configure, shutdown

use std::sync::Arc;
use std::time::Duration;

use droidd_proto::AgentError;
use serde_json::{json, Value};
use tracing::info;

use crate::router::{CommandHandler, RequestContext};

use super::{require_str, HandlerDeps, AGENT_VERSION};

struct SystemHandler {
    deps: Arc<HandlerDeps>,
    method: &'static str,
}

pub async fn register(deps: &Arc<HandlerDeps>) {
    for method in [
        "system.capabilities",
        "system.heartbeat",
        "system.configure",
        "system.shutdown",
    ] {
        deps.router
            .register(Arc::new(SystemHandler {
                deps: deps.clone(),
                method,
            }))
            .await;
    }
}

#[async_trait::async_trait]
impl CommandHandler for SystemHandler {
    fn method(&self) -> &str {
        self.method
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        if self.method == "system.configure" && params.get("key").and_then(|v| v.as_str()).is_none()
        {
            return Err("missing 'key' parameter".to_string());
        }
        Ok(())
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        match self.method {
            "system.capabilities" => self.capabilities().await,
            "system.heartbeat" => self.heartbeat().await,
            "system.configure" => self.configure(params).await,
            "system.shutdown" => self.shutdown().await,
            _ => Err(AgentError::not_implemented(self.method)),
        }
    }
}

impl SystemHandler {
    async fn capabilities(&self) -> Result<Value, AgentError> {
        let snapshot = self.deps.resolver.snapshot().await;
        let methods = self.deps.router.methods().await;
        let mut value = serde_json::to_value(&snapshot)
            .map_err(|e| AgentError::internal(e.to_string()))?;
        value["agentVersion"] = json!(AGENT_VERSION);
        value["registeredMethods"] = json!(methods);
        Ok(value)
    }

    async fn heartbeat(&self) -> Result<Value, AgentError> {
        let uptime = self.deps.started_at.elapsed().as_millis() as u64;
        let (total, free) = read_memory().await;
        Ok(json!({
            "uptime": uptime,
            "freeMemory": free,
            "totalMemory": total,
            "timestamp": droidd_proto::now_ms(),
        }))
    }

    async fn configure(&self, params: Value) -> Result<Value, AgentError> {
        let key = require_str(&params, "key")?;
        let value = params.get("value").cloned().unwrap_or(Value::Null);
        let applied = self.deps.config.write().await.apply_override(&key, &value);
        if applied {
            info!(key, "Runtime config updated");
        }
        Ok(json!({ "success": applied, "key": key }))
    }

    async fn shutdown(&self) -> Result<Value, AgentError> {
        info!("Shutdown requested over control channel");
        let shutdown_tx = self.deps.shutdown_tx.clone();
        // Let the response reach the wire before the transport goes down
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = shutdown_tx.send(());
        });
        Ok(json!({ "success": true }))
    }
}

/// (total, free) memory in bytes from /proc/meminfo
async fn read_memory() -> (u64, u64) {
    let Ok(text) = tokio::fs::read_to_string("/proc/meminfo").await else {
        return (0, 0);
    };
    let mut total = 0u64;
    let mut free = 0u64;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = first_kb(rest) * 1024;
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            free = first_kb(rest) * 1024;
        }
    }
    (total, free)
}

fn first_kb(text: &str) -> u64 {
    text.split_whitespace()
        .find_map(|f| f.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Capabilities, CapabilityResolver};
    use crate::config::AgentConfig;
    use crate::perf::PerfEngine;
    use crate::router::CommandRouter;
    use crate::shell::ShellExecutor;
    use droidd_proto::Envelope;
    use tokio::sync::{broadcast, RwLock};

    async fn deps() -> Arc<HandlerDeps> {
        let shell = Arc::new(ShellExecutor::new(false));
        let (shutdown_tx, _) = broadcast::channel(1);
        let deps = HandlerDeps::new(
            Arc::new(CapabilityResolver::new(Capabilities {
                privileged_shell: false,
                accessibility: false,
                platform_api_level: 34,
            })),
            shell.clone(),
            PerfEngine::new(shell),
            Arc::new(CommandRouter::new()),
            Arc::new(RwLock::new(AgentConfig::default())),
            Arc::new(crate::event_bus::EventBus::new()),
            shutdown_tx,
        );
        register(&deps).await;
        deps
    }

    #[tokio::test]
    async fn test_heartbeat() {
        let deps = deps().await;
        let req = Envelope::request("system.heartbeat", None);
        let resp = deps.router.dispatch(&req).await;
        assert!(resp.is_success());
        let result = resp.result.unwrap();
        assert!(result["uptime"].is_u64());
        assert!(result["freeMemory"].is_u64());
        assert!(result["totalMemory"].is_u64());
        assert!(result["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_capabilities_lists_methods() {
        let deps = deps().await;
        let req = Envelope::request("system.capabilities", None);
        let resp = deps.router.dispatch(&req).await;
        let result = resp.result.unwrap();
        assert_eq!(result["privilegedShell"], false);
        assert_eq!(result["platformApiLevel"], 34);
        let methods: Vec<String> =
            serde_json::from_value(result["registeredMethods"].clone()).unwrap();
        assert!(methods.contains(&"system.heartbeat".to_string()));
        assert!(methods.contains(&"system.capabilities".to_string()));
    }

    #[tokio::test]
    async fn test_configure() {
        let deps = deps().await;
        let req = Envelope::request(
            "system.configure",
            Some(json!({"key": "heartbeat_interval_ms", "value": 2500})),
        );
        let resp = deps.router.dispatch(&req).await;
        assert_eq!(resp.result.unwrap()["success"], true);
        assert_eq!(deps.config.read().await.heartbeat_interval_ms, 2500);

        let req = Envelope::request(
            "system.configure",
            Some(json!({"key": "not_a_key", "value": 1})),
        );
        let resp = deps.router.dispatch(&req).await;
        assert_eq!(resp.result.unwrap()["success"], false);
    }

    #[tokio::test]
    async fn test_configure_requires_key() {
        let deps = deps().await;
        let req = Envelope::request("system.configure", Some(json!({})));
        let resp = deps.router.dispatch(&req).await;
        assert!(resp.error.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_signals_after_response() {
        let deps = deps().await;
        let mut shutdown_rx = deps.shutdown_tx.subscribe();
        let req = Envelope::request("system.shutdown", None);
        let resp = deps.router.dispatch(&req).await;
        assert_eq!(resp.result.unwrap()["success"], true);
        tokio::time::timeout(Duration::from_secs(1), shutdown_rx.recv())
            .await
            .expect("shutdown signal not sent")
            .unwrap();
    }
}

//! `perf.*` handlers: session start/stop, one-off snapshot, live stream

use std::sync::Arc;

use droidd_proto::{error, AgentError};
use serde_json::{json, Value};

use crate::perf::types::MetricKind;
use crate::perf::DEFAULT_INTERVAL_MS;
use crate::router::{CommandHandler, RequestContext};

use super::{str_param, u64_param, HandlerDeps};

struct PerfHandler {
    deps: Arc<HandlerDeps>,
    method: &'static str,
}

pub async fn register(deps: &Arc<HandlerDeps>) {
    for method in ["perf.start", "perf.stop", "perf.snapshot", "perf.stream"] {
        deps.router
            .register(Arc::new(PerfHandler {
                deps: deps.clone(),
                method,
            }))
            .await;
    }
}

fn metrics_of(params: &Value) -> Result<Vec<MetricKind>, AgentError> {
    let Some(raw) = params.get("metrics").and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };
    let mut metrics = Vec::with_capacity(raw.len());
    for item in raw {
        let name = item
            .as_str()
            .ok_or_else(|| AgentError::invalid_params("metrics must be strings"))?;
        let kind = MetricKind::from_str(name)
            .ok_or_else(|| AgentError::invalid_params(format!("unknown metric: {}", name)))?;
        if !metrics.contains(&kind) {
            metrics.push(kind);
        }
    }
    Ok(metrics)
}

#[async_trait::async_trait]
impl CommandHandler for PerfHandler {
    fn method(&self) -> &str {
        self.method
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        match self.method {
            "perf.start" => match params.get("metrics").and_then(|v| v.as_array()) {
                Some(metrics) if !metrics.is_empty() => Ok(()),
                _ => Err("'metrics' must be a non-empty array".to_string()),
            },
            "perf.stop" | "perf.stream"
                if params.get("sessionId").and_then(|v| v.as_str()).is_none() =>
            {
                Err("missing 'sessionId' parameter".to_string())
            }
            _ => Ok(()),
        }
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        match self.method {
            "perf.start" => {
                let metrics = metrics_of(&params)?;
                let package = str_param(&params, "packageName");
                let interval_ms = u64_param(&params, "intervalMs", DEFAULT_INTERVAL_MS);
                let session_id = self.deps.perf.start(package, metrics, interval_ms).await?;
                Ok(json!({ "sessionId": session_id }))
            }
            "perf.stop" => {
                let session_id = str_param(&params, "sessionId")
                    .ok_or_else(|| AgentError::invalid_params("missing 'sessionId' parameter"))?;
                self.deps.streamed_sessions.write().await.remove(&session_id);
                let report = self.deps.perf.stop(&session_id).await?;
                serde_json::to_value(&report).map_err(|e| AgentError::internal(e.to_string()))
            }
            "perf.snapshot" => {
                let session_id = str_param(&params, "sessionId");
                let metrics = metrics_of(&params)?;
                let package = str_param(&params, "packageName");
                let sample = self
                    .deps
                    .perf
                    .snapshot(session_id.as_deref(), package, metrics)
                    .await?;
                serde_json::to_value(&sample).map_err(|e| AgentError::internal(e.to_string()))
            }
            "perf.stream" => {
                let session_id = str_param(&params, "sessionId")
                    .ok_or_else(|| AgentError::invalid_params("missing 'sessionId' parameter"))?;
                if !self.deps.perf.session_exists(&session_id).await {
                    return Err(AgentError::new(
                        error::PERF_SESSION_NOT_FOUND,
                        format!("Perf session not found: {}", session_id),
                    ));
                }
                // The engine forwards samples of marked sessions to the
                // event channel
                self.deps
                    .streamed_sessions
                    .write()
                    .await
                    .insert(session_id.clone());
                Ok(json!({ "sessionId": session_id, "streaming": true }))
            }
            _ => Err(AgentError::not_implemented(self.method)),
        }
    }
}

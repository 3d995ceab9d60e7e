//! Built-in command handler families
//!
//! One module per family (`system.*`, `device.*`, `ui.*`, `app.*`,
//! `perf.*`). Handlers are pure with respect to the envelope: they take
//! params, consult the resolver/strategies, and return a result value or
//! a typed error; the router does the wire conversion.

pub mod app;
pub mod device;
pub mod perf;
pub mod system;
pub mod ui;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use droidd_proto::AgentError;
use regex::Regex;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

use crate::capability::CapabilityResolver;
use crate::config::AgentConfig;
use crate::event_bus::{BusEvent, EventBus};
use crate::perf::PerfEngine;
use crate::router::CommandRouter;
use crate::shell::ShellExecutor;

/// Agent version reported in hello/capabilities and checked by plugins
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Most recent toast observed on screen. Fed by the accessibility
/// strategy provider; read by `ui.toast`.
#[derive(Default)]
pub struct ToastWatcher {
    last: RwLock<Option<(String, i64)>>,
}

impl ToastWatcher {
    pub async fn record(&self, text: impl Into<String>) {
        *self.last.write().await = Some((text.into(), droidd_proto::now_ms()));
    }

    pub async fn last(&self) -> Option<(String, i64)> {
        self.last.read().await.clone()
    }
}

/// Shared state handed to every built-in handler
pub struct HandlerDeps {
    pub resolver: Arc<CapabilityResolver>,
    pub shell: Arc<ShellExecutor>,
    pub perf: Arc<PerfEngine>,
    pub router: Arc<CommandRouter>,
    pub config: Arc<RwLock<AgentConfig>>,
    pub bus: Arc<EventBus>,
    pub started_at: Instant,
    pub shutdown_tx: broadcast::Sender<()>,
    pub toast: Arc<ToastWatcher>,
    /// Perf sessions whose samples stream to the event channel
    pub streamed_sessions: Arc<RwLock<HashSet<String>>>,
    screen_size: RwLock<Option<(i32, i32)>>,
}

impl HandlerDeps {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: Arc<CapabilityResolver>,
        shell: Arc<ShellExecutor>,
        perf: Arc<PerfEngine>,
        router: Arc<CommandRouter>,
        config: Arc<RwLock<AgentConfig>>,
        bus: Arc<EventBus>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Arc<Self> {
        Arc::new(HandlerDeps {
            resolver,
            shell,
            perf,
            router,
            config,
            bus,
            started_at: Instant::now(),
            shutdown_tx,
            toast: Arc::new(ToastWatcher::default()),
            streamed_sessions: Arc::new(RwLock::new(HashSet::new())),
            screen_size: RwLock::new(None),
        })
    }

    /// Record a toast and announce it on the bus (bridged to the event
    /// channel by the engine)
    pub async fn notify_toast(&self, text: impl Into<String>) {
        let text = text.into();
        self.toast.record(text.clone()).await;
        self.bus.emit(BusEvent::new(
            "ui.toast",
            "core",
            serde_json::json!({ "text": text }),
        ));
    }

    /// Physical screen size from `wm size`, cached after the first read.
    /// Falls back to 1080x1920 when unreadable.
    pub async fn screen_size(&self) -> (i32, i32) {
        if let Some(size) = *self.screen_size.read().await {
            return size;
        }
        let size = match self.shell.run("wm size", false).await {
            Ok(result) if result.ok() => parse_wm_size(&result.stdout).unwrap_or((1080, 1920)),
            _ => (1080, 1920),
        };
        *self.screen_size.write().await = Some(size);
        size
    }
}

/// Parse `wm size` output; prefers the override line when present
pub(crate) fn parse_wm_size(text: &str) -> Option<(i32, i32)> {
    let re = Regex::new(r"(Override|Physical) size:\s*(\d+)x(\d+)").ok()?;
    let mut physical = None;
    for cap in re.captures_iter(text) {
        let size = (cap[2].parse().ok()?, cap[3].parse().ok()?);
        if &cap[1] == "Override" {
            return Some(size);
        }
        physical = Some(size);
    }
    physical
}

/// Register every built-in handler family with the router
pub async fn register_builtin(deps: &Arc<HandlerDeps>) {
    system::register(deps).await;
    device::register(deps).await;
    ui::register(deps).await;
    app::register(deps).await;
    perf::register(deps).await;
}

// ===== Param extraction =====
// Handlers tolerate missing numeric subfields; required strings are
// enforced in validate() and here as a second line.

pub(crate) fn str_param(params: &Value, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

pub(crate) fn require_str(params: &Value, key: &str) -> Result<String, AgentError> {
    str_param(params, key)
        .ok_or_else(|| AgentError::invalid_params(format!("missing '{}' parameter", key)))
}

pub(crate) fn u64_param(params: &Value, key: &str, default: u64) -> u64 {
    params
        .get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
        .unwrap_or(default)
}

pub(crate) fn i32_param(params: &Value, key: &str) -> Option<i32> {
    params
        .get(key)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .map(|v| v as i32)
}

pub(crate) fn f64_param(params: &Value, key: &str) -> Option<f64> {
    params.get(key).and_then(|v| v.as_f64())
}

pub(crate) fn bool_param(params: &Value, key: &str, default: bool) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_wm_size() {
        assert_eq!(
            parse_wm_size("Physical size: 1080x2400\n"),
            Some((1080, 2400))
        );
        assert_eq!(
            parse_wm_size("Physical size: 1080x2400\nOverride size: 720x1600\n"),
            Some((720, 1600))
        );
        assert_eq!(parse_wm_size("garbage"), None);
    }

    #[test]
    fn test_param_helpers() {
        let params = json!({"a": "x", "n": 5, "f": 2.9, "b": true});
        assert_eq!(str_param(&params, "a").as_deref(), Some("x"));
        assert!(require_str(&params, "missing").is_err());
        assert_eq!(u64_param(&params, "n", 0), 5);
        assert_eq!(u64_param(&params, "f", 0), 2);
        assert_eq!(u64_param(&params, "missing", 7), 7);
        assert_eq!(i32_param(&params, "n"), Some(5));
        assert!(bool_param(&params, "b", false));
        assert!(!bool_param(&params, "missing", false));
    }

    #[tokio::test]
    async fn test_toast_watcher() {
        let watcher = ToastWatcher::default();
        assert!(watcher.last().await.is_none());
        watcher.record("Saved").await;
        let (text, ts) = watcher.last().await.unwrap();
        assert_eq!(text, "Saved");
        assert!(ts > 0);
    }
}

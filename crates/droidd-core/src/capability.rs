//! Capability resolver
//!
//! Tracks runtime capability flags and the registered strategies for the
//! three operation families. Resolution picks the best available strategy
//! per family; registration is additive and insertion-ordered.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::strategy::{CaptureStrategy, HierarchyStrategy, InputStrategy};

/// Runtime capability flags
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub privileged_shell: bool,
    pub accessibility: bool,
    pub platform_api_level: u32,
}

/// Active strategy name per family; None when a family has no usable
/// strategy under current capabilities
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveStrategyNames {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hierarchy: Option<String>,
}

/// Immutable view handed to handlers and plugins
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySnapshot {
    pub privileged_shell: bool,
    pub accessibility: bool,
    pub platform_api_level: u32,
    pub active_strategy_names: ActiveStrategyNames,
    pub loaded_plugin_ids: Vec<String>,
}

struct Inner {
    capabilities: Capabilities,
    input: Vec<Arc<dyn InputStrategy>>,
    capture: Vec<Arc<dyn CaptureStrategy>>,
    hierarchy: Vec<Arc<dyn HierarchyStrategy>>,
    loaded_plugin_ids: Vec<String>,
}

/// Thread-safe capability + strategy registry.
/// Writers exclude each other; readers see a consistent snapshot.
pub struct CapabilityResolver {
    inner: RwLock<Inner>,
}

impl CapabilityResolver {
    pub fn new(capabilities: Capabilities) -> Self {
        CapabilityResolver {
            inner: RwLock::new(Inner {
                capabilities,
                input: Vec::new(),
                capture: Vec::new(),
                hierarchy: Vec::new(),
                loaded_plugin_ids: Vec::new(),
            }),
        }
    }

    pub async fn capabilities(&self) -> Capabilities {
        self.inner.read().await.capabilities
    }

    /// Replace the capability flags (detection re-run, accessibility
    /// service toggled)
    pub async fn update_capabilities(&self, capabilities: Capabilities) {
        let mut inner = self.inner.write().await;
        inner.capabilities = capabilities;
        info!(
            privileged = capabilities.privileged_shell,
            accessibility = capabilities.accessibility,
            api_level = capabilities.platform_api_level,
            "Capabilities updated"
        );
    }

    pub async fn register_input(&self, strategy: Arc<dyn InputStrategy>) {
        debug!(name = strategy.name(), "Input strategy registered");
        self.inner.write().await.input.push(strategy);
    }

    pub async fn register_capture(&self, strategy: Arc<dyn CaptureStrategy>) {
        debug!(name = strategy.name(), "Capture strategy registered");
        self.inner.write().await.capture.push(strategy);
    }

    pub async fn register_hierarchy(&self, strategy: Arc<dyn HierarchyStrategy>) {
        debug!(name = strategy.name(), "Hierarchy strategy registered");
        self.inner.write().await.hierarchy.push(strategy);
    }

    /// Input: privileged strategy when the privileged shell is up, else
    /// the accessibility-backed one when that service is up, else the
    /// first non-privileged entry.
    pub async fn resolve_input(&self) -> Option<Arc<dyn InputStrategy>> {
        let inner = self.inner.read().await;
        let caps = inner.capabilities;
        if caps.privileged_shell {
            if let Some(s) = inner.input.iter().find(|s| s.requires_privilege()) {
                return Some(s.clone());
            }
        }
        if caps.accessibility {
            if let Some(s) = inner.input.iter().find(|s| s.name() == "accessibility") {
                return Some(s.clone());
            }
        }
        inner
            .input
            .iter()
            .find(|s| !s.requires_privilege())
            .cloned()
    }

    /// Capture: privileged (silent) when available, else the first
    /// non-privileged entry (typically consent-gated framework capture).
    pub async fn resolve_capture(&self) -> Option<Arc<dyn CaptureStrategy>> {
        let inner = self.inner.read().await;
        if inner.capabilities.privileged_shell {
            if let Some(s) = inner.capture.iter().find(|s| s.requires_privilege()) {
                return Some(s.clone());
            }
        }
        inner
            .capture
            .iter()
            .find(|s| !s.requires_privilege())
            .cloned()
    }

    /// Hierarchy: live accessibility tree when the service is up, else
    /// the first remaining strategy (typically a shell-driven snapshot).
    pub async fn resolve_hierarchy(&self) -> Option<Arc<dyn HierarchyStrategy>> {
        let inner = self.inner.read().await;
        if inner.capabilities.accessibility {
            if let Some(s) = inner.hierarchy.iter().find(|s| s.name() == "accessibility") {
                return Some(s.clone());
            }
        }
        inner
            .hierarchy
            .iter()
            .find(|s| s.name() != "accessibility")
            .cloned()
    }

    pub async fn set_loaded_plugins(&self, ids: Vec<String>) {
        self.inner.write().await.loaded_plugin_ids = ids;
    }

    /// Consistent snapshot of flags, resolved strategy names, and loaded
    /// plugins
    pub async fn snapshot(&self) -> CapabilitySnapshot {
        let active = ActiveStrategyNames {
            input: self.resolve_input().await.map(|s| s.name().to_string()),
            capture: self.resolve_capture().await.map(|s| s.name().to_string()),
            hierarchy: self
                .resolve_hierarchy()
                .await
                .map(|s| s.name().to_string()),
        };
        let inner = self.inner.read().await;
        CapabilitySnapshot {
            privileged_shell: inner.capabilities.privileged_shell,
            accessibility: inner.capabilities.accessibility,
            platform_api_level: inner.capabilities.platform_api_level,
            active_strategy_names: active,
            loaded_plugin_ids: inner.loaded_plugin_ids.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use droidd_proto::AgentError;

    use crate::selector::UiElement;
    use crate::strategy::Point;

    struct FakeInput {
        name: &'static str,
        privileged: bool,
    }

    #[async_trait::async_trait]
    impl InputStrategy for FakeInput {
        fn name(&self) -> &str {
            self.name
        }
        fn requires_privilege(&self) -> bool {
            self.privileged
        }
        async fn tap(&self, _x: i32, _y: i32) -> Result<(), AgentError> {
            Ok(())
        }
        async fn swipe(
            &self,
            _x1: i32,
            _y1: i32,
            _x2: i32,
            _y2: i32,
            _d: u64,
        ) -> Result<(), AgentError> {
            Ok(())
        }
        async fn long_press(&self, _x: i32, _y: i32, _d: u64) -> Result<(), AgentError> {
            Ok(())
        }
        async fn key_event(&self, _k: u32) -> Result<(), AgentError> {
            Ok(())
        }
        async fn input_text(&self, _t: &str) -> Result<(), AgentError> {
            Ok(())
        }
        async fn gesture(&self, _p: &[Point], _d: u64) -> Result<(), AgentError> {
            Ok(())
        }
    }

    struct FakeCapture {
        name: &'static str,
        privileged: bool,
    }

    #[async_trait::async_trait]
    impl CaptureStrategy for FakeCapture {
        fn name(&self) -> &str {
            self.name
        }
        fn requires_privilege(&self) -> bool {
            self.privileged
        }
        async fn capture(&self) -> Result<Bytes, AgentError> {
            Ok(Bytes::new())
        }
    }

    struct FakeHierarchy {
        name: &'static str,
    }

    #[async_trait::async_trait]
    impl HierarchyStrategy for FakeHierarchy {
        fn name(&self) -> &str {
            self.name
        }
        fn requires_privilege(&self) -> bool {
            false
        }
        async fn dump(&self) -> Result<Vec<UiElement>, AgentError> {
            Ok(Vec::new())
        }
    }

    fn caps(privileged: bool, accessibility: bool) -> Capabilities {
        Capabilities {
            privileged_shell: privileged,
            accessibility,
            platform_api_level: 34,
        }
    }

    async fn resolver_with_inputs(c: Capabilities) -> CapabilityResolver {
        let resolver = CapabilityResolver::new(c);
        resolver
            .register_input(Arc::new(FakeInput {
                name: "shell",
                privileged: true,
            }))
            .await;
        resolver
            .register_input(Arc::new(FakeInput {
                name: "accessibility",
                privileged: false,
            }))
            .await;
        resolver
    }

    #[tokio::test]
    async fn test_input_prefers_privileged() {
        let resolver = resolver_with_inputs(caps(true, true)).await;
        assert_eq!(resolver.resolve_input().await.unwrap().name(), "shell");
    }

    #[tokio::test]
    async fn test_input_falls_back_to_accessibility() {
        let resolver = resolver_with_inputs(caps(false, true)).await;
        assert_eq!(
            resolver.resolve_input().await.unwrap().name(),
            "accessibility"
        );
    }

    #[tokio::test]
    async fn test_input_last_resort_non_privileged() {
        let resolver = resolver_with_inputs(caps(false, false)).await;
        // accessibility entry is the only non-privileged one
        assert_eq!(
            resolver.resolve_input().await.unwrap().name(),
            "accessibility"
        );
    }

    #[tokio::test]
    async fn test_input_none_when_empty() {
        let resolver = CapabilityResolver::new(caps(true, true));
        assert!(resolver.resolve_input().await.is_none());
    }

    #[tokio::test]
    async fn test_capture_policy() {
        let resolver = CapabilityResolver::new(caps(true, false));
        resolver
            .register_capture(Arc::new(FakeCapture {
                name: "projection",
                privileged: false,
            }))
            .await;
        resolver
            .register_capture(Arc::new(FakeCapture {
                name: "shell",
                privileged: true,
            }))
            .await;
        assert_eq!(resolver.resolve_capture().await.unwrap().name(), "shell");

        resolver.update_capabilities(caps(false, false)).await;
        assert_eq!(
            resolver.resolve_capture().await.unwrap().name(),
            "projection"
        );
    }

    #[tokio::test]
    async fn test_hierarchy_policy() {
        let resolver = CapabilityResolver::new(caps(false, true));
        resolver
            .register_hierarchy(Arc::new(FakeHierarchy { name: "shell" }))
            .await;
        resolver
            .register_hierarchy(Arc::new(FakeHierarchy {
                name: "accessibility",
            }))
            .await;
        assert_eq!(
            resolver.resolve_hierarchy().await.unwrap().name(),
            "accessibility"
        );

        resolver.update_capabilities(caps(false, false)).await;
        assert_eq!(resolver.resolve_hierarchy().await.unwrap().name(), "shell");
    }

    #[tokio::test]
    async fn test_snapshot() {
        let resolver = resolver_with_inputs(caps(true, false)).await;
        resolver
            .set_loaded_plugins(vec!["com.example.ocr".into()])
            .await;
        let snapshot = resolver.snapshot().await;
        assert!(snapshot.privileged_shell);
        assert!(!snapshot.accessibility);
        assert_eq!(snapshot.active_strategy_names.input.as_deref(), Some("shell"));
        assert!(snapshot.active_strategy_names.capture.is_none());
        assert_eq!(snapshot.loaded_plugin_ids, vec!["com.example.ocr"]);
    }
}

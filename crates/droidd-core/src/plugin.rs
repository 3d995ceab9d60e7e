//! Plugin registry
//!
//! Discovers handler bundles in the plugins directory, drives their
//! lifecycle, and registers their handlers with the router while they
//! run. Entry points resolve against statically linked factories
//! registered at startup; the registry contract does not depend on a
//! dynamic loader.
//!
//! State machine per plugin: LOADED → INITIALIZED → STARTED → STOPPED,
//! with ERROR on an init/start failure. Load and unload are serialized
//! behind one mutex.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use droidd_proto::{error, AgentError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::capability::{CapabilityResolver, CapabilitySnapshot};
use crate::event_bus::{BusEvent, EventBus};
use crate::router::{CommandHandler, CommandRouter};
use crate::shell::ShellExecutor;

/// Manifest file name inside a bundle directory
const MANIFEST_NAME: &str = "plugin.json";

/// Plugin lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PluginState {
    Loaded,
    Initialized,
    Started,
    Stopped,
    Error,
}

/// Bundle manifest, `plugin.json` at the bundle root
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub id: String,
    pub version: String,
    pub display_name: String,
    pub entry_point: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_agent_version: Option<String>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Context handed to plugins on init
pub struct PluginContext {
    pub agent_version: String,
    pub capabilities: CapabilitySnapshot,
    pub data_dir: PathBuf,
    pub shell: Arc<ShellExecutor>,
    pub bus: Arc<EventBus>,
}

/// A loadable plugin. Hooks default to no-ops; `handlers` supplies the
/// command handlers registered while the plugin is STARTED.
#[async_trait::async_trait]
pub trait AgentPlugin: Send + Sync {
    async fn on_init(&self, _ctx: &PluginContext) -> Result<(), AgentError> {
        Ok(())
    }

    async fn on_start(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn on_stop(&self) {}

    async fn on_destroy(&self) {}

    fn handlers(&self) -> Vec<Arc<dyn CommandHandler>>;
}

/// Constructor for a statically linked plugin entry point
pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn AgentPlugin> + Send + Sync>;

struct PluginEntry {
    manifest: PluginManifest,
    plugin: Arc<dyn AgentPlugin>,
    state: PluginState,
    registered_methods: Vec<String>,
}

/// Loads, starts, and unloads plugins; owns them for their lifetime
pub struct PluginRegistry {
    agent_version: String,
    router: Arc<CommandRouter>,
    resolver: Arc<CapabilityResolver>,
    bus: Arc<EventBus>,
    shell: Arc<ShellExecutor>,
    data_dir: PathBuf,
    factories: Mutex<HashMap<String, PluginFactory>>,
    plugins: Mutex<HashMap<String, PluginEntry>>,
}

impl PluginRegistry {
    pub fn new(
        agent_version: impl Into<String>,
        router: Arc<CommandRouter>,
        resolver: Arc<CapabilityResolver>,
        bus: Arc<EventBus>,
        shell: Arc<ShellExecutor>,
        data_dir: PathBuf,
    ) -> Self {
        PluginRegistry {
            agent_version: agent_version.into(),
            router,
            resolver,
            bus,
            shell,
            data_dir,
            factories: Mutex::new(HashMap::new()),
            plugins: Mutex::new(HashMap::new()),
        }
    }

    /// Register a statically linked entry point
    pub async fn register_factory(&self, entry_point: impl Into<String>, factory: PluginFactory) {
        self.factories
            .lock()
            .await
            .insert(entry_point.into(), factory);
    }

    /// Scan the plugins directory for bundles and load-and-start each.
    /// Bundles are `<dir>/<bundle>/plugin.json` or flat `<dir>/*.json`.
    /// A failing bundle is logged and skipped; the scan continues.
    pub async fn scan(&self, dir: &Path) -> usize {
        let mut loaded = 0;
        let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
            debug!(dir = %dir.display(), "No plugins directory");
            return 0;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let manifest_path = if path.is_dir() {
                path.join(MANIFEST_NAME)
            } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
                path.clone()
            } else {
                continue;
            };
            if !manifest_path.exists() {
                continue;
            }
            match self.load_manifest_file(&manifest_path).await {
                Ok(id) => {
                    if let Err(e) = self.start(&id).await {
                        warn!(plugin = %id, "Plugin start failed: {}", e.message);
                    } else {
                        loaded += 1;
                    }
                }
                Err(e) => {
                    warn!(path = %manifest_path.display(), "Plugin load failed: {}", e.message);
                }
            }
        }
        loaded
    }

    async fn load_manifest_file(&self, path: &Path) -> Result<String, AgentError> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            AgentError::new(
                error::PLUGIN_MANIFEST_INVALID,
                format!("cannot read manifest: {}", e),
            )
        })?;
        let manifest: PluginManifest = serde_json::from_str(&text).map_err(|e| {
            AgentError::new(
                error::PLUGIN_MANIFEST_INVALID,
                format!("invalid manifest: {}", e),
            )
        })?;
        self.load(manifest).await
    }

    /// Load a plugin: resolve its entry point, instantiate, run
    /// `on_init`. Returns the plugin id.
    pub async fn load(&self, manifest: PluginManifest) -> Result<String, AgentError> {
        if let Some(min) = &manifest.min_agent_version {
            if version_lt(&self.agent_version, min) {
                return Err(AgentError::new(
                    error::PLUGIN_INIT_FAILED,
                    format!(
                        "plugin {} requires agent >= {}, running {}",
                        manifest.id, min, self.agent_version
                    ),
                ));
            }
        }

        let factory = {
            let factories = self.factories.lock().await;
            factories.get(&manifest.entry_point).cloned()
        };
        let factory = factory.ok_or_else(|| {
            AgentError::new(
                error::PLUGIN_INIT_FAILED,
                format!("no entry point registered: {}", manifest.entry_point),
            )
        })?;

        let mut plugins = self.plugins.lock().await;
        if plugins.contains_key(&manifest.id) {
            return Err(AgentError::new(
                error::PLUGIN_INIT_FAILED,
                format!("plugin already loaded: {}", manifest.id),
            ));
        }

        let plugin = factory();
        let id = manifest.id.clone();
        let mut entry = PluginEntry {
            manifest,
            plugin,
            state: PluginState::Loaded,
            registered_methods: Vec::new(),
        };

        let ctx = PluginContext {
            agent_version: self.agent_version.clone(),
            capabilities: self.resolver.snapshot().await,
            data_dir: self.data_dir.join(&id),
            shell: self.shell.clone(),
            bus: self.bus.clone(),
        };
        let _ = tokio::fs::create_dir_all(&ctx.data_dir).await;

        match entry.plugin.on_init(&ctx).await {
            Ok(()) => entry.state = PluginState::Initialized,
            Err(e) => {
                entry.state = PluginState::Error;
                plugins.insert(id.clone(), entry);
                return Err(AgentError::new(
                    error::PLUGIN_INIT_FAILED,
                    format!("plugin {} init failed: {}", id, e.message),
                ));
            }
        }

        debug!(plugin = %id, "Plugin initialized");
        plugins.insert(id.clone(), entry);
        Ok(id)
    }

    /// Start a plugin: verify dependencies, register its handlers, run
    /// `on_start`. A failure rolls back any partially registered
    /// handlers and parks the plugin in ERROR.
    pub async fn start(&self, id: &str) -> Result<(), AgentError> {
        let mut plugins = self.plugins.lock().await;

        // Dependencies must already be STARTED
        let deps = plugins
            .get(id)
            .ok_or_else(|| {
                AgentError::new(error::PLUGIN_INIT_FAILED, format!("plugin not loaded: {}", id))
            })?
            .manifest
            .dependencies
            .clone();
        for dep in &deps {
            let started = plugins
                .get(dep)
                .map(|e| e.state == PluginState::Started)
                .unwrap_or(false);
            if !started {
                return Err(AgentError::new(
                    error::PLUGIN_DEPENDENCY_MISSING,
                    format!("plugin {} requires {} to be started", id, dep),
                ));
            }
        }

        let Some(entry) = plugins.get_mut(id) else {
            return Err(AgentError::new(
                error::PLUGIN_INIT_FAILED,
                format!("plugin not loaded: {}", id),
            ));
        };
        if entry.state != PluginState::Initialized {
            return Err(AgentError::new(
                error::PLUGIN_INIT_FAILED,
                format!("plugin {} not in INITIALIZED state", id),
            ));
        }

        let handlers = entry.plugin.handlers();
        let mut registered = Vec::with_capacity(handlers.len());
        for handler in handlers {
            registered.push(handler.method().to_string());
            self.router.register(handler).await;
        }

        if let Err(e) = entry.plugin.on_start().await {
            for method in &registered {
                self.router.unregister(method).await;
            }
            entry.state = PluginState::Error;
            return Err(AgentError::new(
                error::PLUGIN_INIT_FAILED,
                format!("plugin {} start failed: {}", id, e.message),
            ));
        }

        entry.registered_methods = registered;
        entry.state = PluginState::Started;
        info!(plugin = %id, methods = entry.registered_methods.len(), "Plugin started");

        let ids = started_ids(&plugins);
        drop(plugins);
        self.resolver.set_loaded_plugins(ids).await;
        self.bus.emit(BusEvent::new(
            "plugin.loaded",
            "registry",
            json!({ "pluginId": id }),
        ));
        Ok(())
    }

    /// Unload a plugin: unregister handlers, run `on_stop` and
    /// `on_destroy`, drop it.
    pub async fn unload(&self, id: &str) -> Result<(), AgentError> {
        let mut plugins = self.plugins.lock().await;
        let mut entry = plugins.remove(id).ok_or_else(|| {
            AgentError::new(error::PLUGIN_INIT_FAILED, format!("plugin not loaded: {}", id))
        })?;

        for method in &entry.registered_methods {
            self.router.unregister(method).await;
        }
        if entry.state == PluginState::Started || entry.state == PluginState::Initialized {
            entry.plugin.on_stop().await;
            entry.plugin.on_destroy().await;
        }
        entry.state = PluginState::Stopped;
        info!(plugin = %id, "Plugin unloaded");

        let ids = started_ids(&plugins);
        drop(plugins);
        self.resolver.set_loaded_plugins(ids).await;
        self.bus.emit(BusEvent::new(
            "plugin.unloaded",
            "registry",
            json!({ "pluginId": id }),
        ));
        Ok(())
    }

    /// Unload every plugin (engine teardown)
    pub async fn unload_all(&self) {
        let ids: Vec<String> = self.plugins.lock().await.keys().cloned().collect();
        for id in ids {
            let _ = self.unload(&id).await;
        }
    }

    /// `(id, version, state)` for every known plugin
    pub async fn list(&self) -> Vec<(String, String, PluginState)> {
        self.plugins
            .lock()
            .await
            .values()
            .map(|e| (e.manifest.id.clone(), e.manifest.version.clone(), e.state))
            .collect()
    }
}

fn started_ids(plugins: &HashMap<String, PluginEntry>) -> Vec<String> {
    let mut ids: Vec<String> = plugins
        .values()
        .filter(|e| e.state == PluginState::Started)
        .map(|e| e.manifest.id.clone())
        .collect();
    ids.sort();
    ids
}

/// Dotted-numeric version compare: true when `a < b`
fn version_lt(a: &str, b: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| part.parse().unwrap_or(0))
            .collect()
    };
    parse(a) < parse(b)
}

//! Agent engine - top-level coordinator
//!
//! Owns the transport, router, resolver, plugin registry, and perf
//! engine for the process lifetime. Wires transport ⇄ router, registers
//! built-in handlers and strategies, loads plugins, and drives
//! start/stop. The engine is the sole process-wide singleton; every
//! narrower scope (plugin context, request context) is passed explicitly.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::OnceCell;
use serde_json::json;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::auth::Authenticator;
use crate::capability::{Capabilities, CapabilityResolver};
use crate::config::AgentConfig;
use crate::event_bus::EventBus;
use crate::handlers::{self, HandlerDeps, AGENT_VERSION};
use crate::perf::PerfEngine;
use crate::plugin::PluginRegistry;
use crate::router::CommandRouter;
use crate::shell::ShellExecutor;
use crate::strategy::{ShellCaptureStrategy, ShellHierarchyStrategy, ShellInputStrategy};
use crate::transport::{TransportOptions, TransportServer};
use droidd_proto::Envelope;

static ENGINE: OnceCell<Arc<AgentEngine>> = OnceCell::new();

/// Bus event types mirrored onto the transport event channel
const BRIDGED_EVENTS: &[&str] = &["plugin.loaded", "plugin.unloaded", "ui.toast", "app.launched"];

/// The agent engine
pub struct AgentEngine {
    config: Arc<RwLock<AgentConfig>>,
    pub router: Arc<CommandRouter>,
    pub resolver: Arc<CapabilityResolver>,
    pub shell: Arc<ShellExecutor>,
    pub bus: Arc<EventBus>,
    pub perf: Arc<PerfEngine>,
    pub plugins: Arc<PluginRegistry>,
    pub transport: Arc<TransportServer>,
    deps: Arc<HandlerDeps>,
    shutdown_tx: broadcast::Sender<()>,
    started: RwLock<bool>,
}

impl AgentEngine {
    /// Probe device capabilities and assemble the engine. Nothing runs
    /// until `start`.
    pub async fn new(config: AgentConfig) -> Arc<Self> {
        let privileged = ShellExecutor::probe_privileged().await;
        let shell = Arc::new(ShellExecutor::new(privileged));
        let api_level = shell.probe_api_level().await;
        let accessibility = probe_accessibility(&shell).await;

        let resolver = Arc::new(CapabilityResolver::new(Capabilities {
            privileged_shell: privileged,
            accessibility,
            platform_api_level: api_level,
        }));
        resolver
            .register_input(Arc::new(ShellInputStrategy::new(shell.clone())))
            .await;
        resolver
            .register_capture(Arc::new(ShellCaptureStrategy::new(shell.clone())))
            .await;
        resolver
            .register_hierarchy(Arc::new(ShellHierarchyStrategy::new(shell.clone())))
            .await;

        let router = Arc::new(CommandRouter::new());
        let bus = Arc::new(EventBus::new());
        let perf = PerfEngine::new(shell.clone());
        let auth = Arc::new(Authenticator::new(config.auth_token.clone()));
        let (shutdown_tx, _) = broadcast::channel(1);

        let plugins = Arc::new(PluginRegistry::new(
            AGENT_VERSION,
            router.clone(),
            resolver.clone(),
            bus.clone(),
            shell.clone(),
            config.data_dir.clone(),
        ));

        let transport = TransportServer::new(
            TransportOptions {
                host: config.host.clone(),
                control_port: config.control_port,
                binary_port: config.binary_port,
                event_port: config.event_port,
                max_connections: config.max_connections,
                heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
                heartbeat_timeout: Duration::from_millis(config.heartbeat_timeout_ms),
            },
            auth,
            router.clone(),
            json!({ "agentVersion": AGENT_VERSION }),
        );

        let config = Arc::new(RwLock::new(config));
        let deps = HandlerDeps::new(
            resolver.clone(),
            shell.clone(),
            perf.clone(),
            router.clone(),
            config.clone(),
            bus.clone(),
            shutdown_tx.clone(),
        );

        Arc::new(AgentEngine {
            config,
            router,
            resolver,
            shell,
            bus,
            perf,
            plugins,
            transport,
            deps,
            shutdown_tx,
            started: RwLock::new(false),
        })
    }

    /// Install the process-wide instance. Fails if one is already
    /// installed.
    pub fn install(engine: Arc<AgentEngine>) -> Result<()> {
        ENGINE
            .set(engine)
            .map_err(|_| anyhow::anyhow!("agent engine already installed"))
    }

    pub fn global() -> Option<Arc<AgentEngine>> {
        ENGINE.get().cloned()
    }

    /// Register built-ins, load plugins, start the transport, and bridge
    /// internal streams onto the event channel.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut started = self.started.write().await;
            if *started {
                anyhow::bail!("agent engine already started");
            }
            *started = true;
        }

        handlers::register_builtin(&self.deps).await;

        let plugins_dir = self.config.read().await.plugins_dir.clone();
        let loaded = self.plugins.scan(&plugins_dir).await;
        if loaded > 0 {
            info!(loaded, "Plugins started");
        }

        self.transport.start().await?;

        self.spawn_perf_bridge();
        self.spawn_bus_bridge();

        let snapshot = self.resolver.snapshot().await;
        info!(
            version = AGENT_VERSION,
            privileged = snapshot.privileged_shell,
            accessibility = snapshot.accessibility,
            api_level = snapshot.platform_api_level,
            "Agent engine started"
        );
        Ok(())
    }

    /// Samples of streamed perf sessions go to the event channel
    fn spawn_perf_bridge(self: &Arc<Self>) {
        let mut samples = self.perf.subscribe();
        let streamed = self.deps.streamed_sessions.clone();
        let transport = self.transport.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    sample = samples.recv() => {
                        match sample {
                            Ok((session_id, sample)) => {
                                if streamed.read().await.contains(&session_id) {
                                    transport.emit_event(Envelope::event(
                                        "perf.sample",
                                        Some(json!({
                                            "sessionId": session_id,
                                            "sample": sample,
                                        })),
                                    ));
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    /// Deliberately mirror a fixed set of bus events to controllers
    fn spawn_bus_bridge(self: &Arc<Self>) {
        let mut subscription = self.bus.subscribe_all();
        let transport = self.transport.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = subscription.recv() => {
                        let Some(event) = event else { break };
                        if BRIDGED_EVENTS.contains(&event.event_type.as_str()) {
                            transport.emit_event(Envelope::event(
                                event.event_type.clone(),
                                Some(event.data.clone()),
                            ));
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    /// Block until a shutdown is requested (`system.shutdown` or a
    /// process signal relayed by the host)
    pub async fn wait_for_shutdown(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let _ = shutdown_rx.recv().await;
    }

    /// Request an orderly stop from the host side
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Teardown: stop transport, unload plugins, cancel in-flight work
    pub async fn stop(&self) {
        {
            let mut started = self.started.write().await;
            if !*started {
                return;
            }
            *started = false;
        }
        self.transport.stop().await;
        self.plugins.unload_all().await;
        self.perf.stop_all().await;
        let _ = self.shutdown_tx.send(());
        info!("Agent engine stopped");
    }
}

/// Any enabled accessibility service counts; the dedicated provider
/// refines this through `update_capabilities` when it binds
async fn probe_accessibility(shell: &ShellExecutor) -> bool {
    match shell
        .run("settings get secure enabled_accessibility_services", false)
        .await
    {
        Ok(result) if result.ok() => {
            let value = result.stdout.trim();
            !value.is_empty() && value != "null"
        }
        _ => {
            warn!("Accessibility probe failed; assuming unavailable");
            false
        }
    }
}

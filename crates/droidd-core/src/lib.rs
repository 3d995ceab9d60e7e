//! droidd core
//!
//! The device-side agent runtime: three-channel WebSocket transport,
//! command router, capability-based strategy resolution, plugin
//! registry, and the performance sampling engine. The daemon crate wires
//! an [`engine::AgentEngine`] and drives start/stop.

pub mod auth;
pub mod capability;
pub mod config;
pub mod engine;
pub mod event_bus;
pub mod handlers;
pub mod perf;
pub mod plugin;
pub mod router;
pub mod selector;
pub mod shell;
pub mod strategy;
pub mod transport;

pub use auth::{Authenticator, Session};
pub use capability::{Capabilities, CapabilityResolver, CapabilitySnapshot};
pub use config::AgentConfig;
pub use engine::AgentEngine;
pub use event_bus::{BusEvent, EventBus};
pub use handlers::{HandlerDeps, AGENT_VERSION};
pub use perf::{PerfEngine, SessionReport};
pub use plugin::{AgentPlugin, PluginContext, PluginManifest, PluginRegistry, PluginState};
pub use router::{CommandHandler, CommandRouter, RequestContext};
pub use selector::{Rect, Selector, UiElement};
pub use shell::{ShellExecutor, ShellResult};
pub use strategy::{CaptureStrategy, HierarchyStrategy, InputStrategy};
pub use transport::{TransportOptions, TransportServer};

//! Agent configuration
//!
//! Loaded from a YAML file at startup; a missing file yields defaults.
//! `system.configure` may adjust a small set of keys at runtime.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

fn default_control_port() -> u16 {
    18900
}
fn default_binary_port() -> u16 {
    18901
}
fn default_event_port() -> u16 {
    18902
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_max_connections() -> usize {
    5
}
fn default_heartbeat_interval_ms() -> u64 {
    5000
}
fn default_heartbeat_timeout_ms() -> u64 {
    15000
}
fn default_plugins_dir() -> PathBuf {
    PathBuf::from("./plugins")
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

/// Agent runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    #[serde(default = "default_binary_port")]
    pub binary_port: u16,
    #[serde(default = "default_event_port")]
    pub event_port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Bearer token; absent means all clients are admitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Directory scanned for plugin bundles on startup
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: PathBuf,
    /// Root of per-plugin data directories
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            control_port: default_control_port(),
            binary_port: default_binary_port(),
            event_port: default_event_port(),
            host: default_host(),
            auth_token: None,
            max_connections: default_max_connections(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            plugins_dir: default_plugins_dir(),
            data_dir: default_data_dir(),
        }
    }
}

impl AgentConfig {
    /// Load from a YAML file; missing file yields defaults, unknown keys
    /// are ignored.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => serde_yaml::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    /// Apply a runtime override from `system.configure`. Returns false
    /// for unknown or immutable keys (ports and host are fixed after
    /// startup).
    pub fn apply_override(&mut self, key: &str, value: &serde_json::Value) -> bool {
        match key {
            "heartbeat_interval_ms" => {
                if let Some(v) = value.as_u64() {
                    self.heartbeat_interval_ms = v;
                    return true;
                }
                false
            }
            "heartbeat_timeout_ms" => {
                if let Some(v) = value.as_u64() {
                    self.heartbeat_timeout_ms = v;
                    return true;
                }
                false
            }
            "max_connections" => {
                if let Some(v) = value.as_u64() {
                    self.max_connections = v as usize;
                    return true;
                }
                false
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.control_port, 18900);
        assert_eq!(cfg.binary_port, 18901);
        assert_eq!(cfg.event_port, 18902);
        assert_eq!(cfg.host, "0.0.0.0");
        assert!(cfg.auth_token.is_none());
        assert_eq!(cfg.max_connections, 5);
        assert_eq!(cfg.heartbeat_interval_ms, 5000);
        assert_eq!(cfg.heartbeat_timeout_ms, 15000);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let cfg = AgentConfig::load(Path::new("/nonexistent/agent.yaml"));
        assert_eq!(cfg.control_port, 18900);
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "control_port: 28900\nauth_token: secret\nunknown_key: 1").unwrap();
        let cfg = AgentConfig::load(f.path());
        assert_eq!(cfg.control_port, 28900);
        assert_eq!(cfg.auth_token.as_deref(), Some("secret"));
        // untouched keys keep defaults
        assert_eq!(cfg.event_port, 18902);
    }

    #[test]
    fn test_apply_override() {
        let mut cfg = AgentConfig::default();
        assert!(cfg.apply_override("heartbeat_interval_ms", &serde_json::json!(2000)));
        assert_eq!(cfg.heartbeat_interval_ms, 2000);
        assert!(!cfg.apply_override("control_port", &serde_json::json!(1)));
        assert!(!cfg.apply_override("bogus", &serde_json::json!(1)));
    }
}

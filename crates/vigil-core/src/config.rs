use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const PROBE_INTERVAL_SECS: u64 = 30; // ping cadence for every peer
pub const PONG_TIMEOUT_SECS: u64 = 60; // peer silent this long is dropped
pub const WRITE_TIMEOUT_SECS: u64 = 10; // deadline for one frame write
pub const MAX_MESSAGE_BYTES: usize = 512; // inbound frames are control traffic only
pub const BROADCAST_BUFFER: usize = 256; // hub inbox, shed when full
pub const CLIENT_BUFFER: usize = 256; // per-peer outbound queue
pub const RECENT_TASKS: usize = 50;
pub const MONITOR_INTERVAL_SECS: u64 = 30;
pub const MONITOR_TIMEOUT_SECS: u64 = 5;

/// Top-level config (vigil.toml + VIGIL_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VigilConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_auth_mode")]
    pub mode: AuthMode,
    pub token: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::None,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    Token,
    None,
}

/// Broadcast hub tuning. Every duration is whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
    /// 0 disables liveness expiry; failed probe writes still drop the peer.
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    #[serde(default = "default_broadcast_buffer")]
    pub broadcast_buffer: usize,
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: PROBE_INTERVAL_SECS,
            pong_timeout_secs: PONG_TIMEOUT_SECS,
            write_timeout_secs: WRITE_TIMEOUT_SECS,
            max_message_bytes: MAX_MESSAGE_BYTES,
            broadcast_buffer: BROADCAST_BUFFER,
            client_buffer: CLIENT_BUFFER,
        }
    }
}

/// Periodic reachability checks of monitored canvases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_monitor_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: MONITOR_INTERVAL_SECS,
            timeout_secs: MONITOR_TIMEOUT_SECS,
            targets: Vec::new(),
        }
    }
}

/// One monitored canvas, e.g. `[[monitor.targets]] id = "lobby"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetConfig {
    pub id: String,
    /// Display name; falls back to `id`.
    pub name: Option<String>,
    /// Health URL polled with GET; any 2xx counts as connected.
    pub url: String,
}

impl TargetConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Size of the recent-task ring included in initial snapshots.
    #[serde(default = "default_recent_tasks")]
    pub recent_tasks: usize,
    pub version: Option<String>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            recent_tasks: RECENT_TASKS,
            version: None,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_auth_mode() -> AuthMode {
    AuthMode::None
}
fn default_probe_interval() -> u64 {
    PROBE_INTERVAL_SECS
}
fn default_pong_timeout() -> u64 {
    PONG_TIMEOUT_SECS
}
fn default_write_timeout() -> u64 {
    WRITE_TIMEOUT_SECS
}
fn default_max_message_bytes() -> usize {
    MAX_MESSAGE_BYTES
}
fn default_broadcast_buffer() -> usize {
    BROADCAST_BUFFER
}
fn default_client_buffer() -> usize {
    CLIENT_BUFFER
}
fn default_monitor_interval() -> u64 {
    MONITOR_INTERVAL_SECS
}
fn default_monitor_timeout() -> u64 {
    MONITOR_TIMEOUT_SECS
}
fn default_recent_tasks() -> usize {
    RECENT_TASKS
}

impl VigilConfig {
    /// Load config from a TOML file with VIGIL_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.vigil/vigil.toml
    ///
    /// Env keys nest with a double underscore:
    /// `VIGIL_HUB__PROBE_INTERVAL_SECS=10`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("VIGIL_").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> crate::error::Result<Self> {
        figment
            .extract()
            .map_err(|e| crate::error::VigilError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.vigil/vigil.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = VigilConfig::from_figment(Figment::from(Toml::string(""))).unwrap();
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
        assert_eq!(cfg.gateway.auth.mode, AuthMode::None);
        assert_eq!(cfg.hub.probe_interval_secs, PROBE_INTERVAL_SECS);
        assert_eq!(cfg.hub.client_buffer, CLIENT_BUFFER);
        assert!(cfg.monitor.targets.is_empty());
    }

    #[test]
    fn toml_overrides_nested_sections() {
        let toml = r#"
            [gateway]
            port = 8080
            [gateway.auth]
            mode = "token"
            token = "s3cret"

            [hub]
            probe_interval_secs = 5
            pong_timeout_secs = 0

            [[monitor.targets]]
            id = "lobby"
            url = "http://10.0.0.5/health"
        "#;
        let cfg = VigilConfig::from_figment(Figment::from(Toml::string(toml))).unwrap();
        assert_eq!(cfg.gateway.port, 8080);
        assert_eq!(cfg.gateway.auth.mode, AuthMode::Token);
        assert_eq!(cfg.gateway.auth.token.as_deref(), Some("s3cret"));
        assert_eq!(cfg.hub.probe_interval_secs, 5);
        assert_eq!(cfg.hub.pong_timeout_secs, 0);
        assert_eq!(cfg.hub.write_timeout_secs, WRITE_TIMEOUT_SECS);
        assert_eq!(cfg.monitor.targets.len(), 1);
        assert_eq!(cfg.monitor.targets[0].display_name(), "lobby");
    }

    #[test]
    fn bad_auth_mode_is_config_error() {
        let toml = "[gateway.auth]\nmode = \"kerberos\"";
        let err = VigilConfig::from_figment(Figment::from(Toml::string(toml))).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}

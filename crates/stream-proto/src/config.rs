use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;
use super::schedule::DEFAULT_BASE_URL;

pub const DEFAULT_LIVE_URL: &str = "http://mp3stream3.apasf.apa.at:8000/;stream.mp3";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
    #[serde(default)]
    pub leases: LeaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// FIFO a telephony script writes `ringing`/`offhook`/`idle` lines into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_state_fifo: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Day schedule endpoint; `yyyymmdd` is appended.
    #[serde(default = "default_schedule_base_url")]
    pub schedule_base_url: String,
    /// Source classified as the live stream (no seeking).
    #[serde(default = "default_live_url")]
    pub live_url: String,
    /// Directory holding `offline.json`.
    #[serde(default = "default_offline_dir")]
    pub offline_dir: PathBuf,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    #[serde(default = "default_network_caching_ms")]
    pub network_caching_ms: u64,
}

/// Which primitive backs the keep-alive leases.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LeaseBackendKind {
    /// Bookkeeping only.
    #[default]
    None,
    /// `systemd-inhibit` child processes (Linux).
    Inhibit,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LeaseConfig {
    #[serde(default)]
    pub backend: LeaseBackendKind,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            call_state_fifo: None,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            schedule_base_url: default_schedule_base_url(),
            live_url: default_live_url(),
            offline_dir: default_offline_dir(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            network_caching_ms: default_network_caching_ms(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    platform::DAEMON_TCP_PORT
}

fn default_schedule_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_live_url() -> String {
    DEFAULT_LIVE_URL.to_string()
}

fn default_offline_dir() -> PathBuf {
    platform::data_dir().join("offline")
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_volume() -> f32 {
    0.5
}

fn default_network_caching_ms() -> u64 {
    6000
}

impl Config {
    /// Load `config.toml`, writing the defaults on first run.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    pub fn daemon_address(&self) -> String {
        format!("{}:{}", self.daemon.bind_address, self.daemon.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.daemon.port, platform::DAEMON_TCP_PORT);
        assert_eq!(config.daemon.bind_address, "127.0.0.1");
        assert_eq!(config.catalog.live_url, DEFAULT_LIVE_URL);
        assert!(config.catalog.schedule_base_url.starts_with("http://"));
        assert!(config.catalog.offline_dir.ends_with("publicstream/offline"));
        assert_eq!(config.mpv.network_caching_ms, 6000);
        assert_eq!(config.leases.backend, LeaseBackendKind::None);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [catalog]
            live_url = "http://example/live"

            [leases]
            backend = "inhibit"
            "#,
        )
        .unwrap();
        assert_eq!(config.catalog.live_url, "http://example/live");
        assert_eq!(config.catalog.request_timeout_secs, 15);
        assert_eq!(config.leases.backend, LeaseBackendKind::Inhibit);
        assert_eq!(config.daemon.port, platform::DAEMON_TCP_PORT);
    }
}

//! # Hub configuration
//!
//! A single TOML file describes the relay port, the optional home-automation
//! hub and every printer to supervise.
//!
//! ```toml
//! port = 3000
//!
//! [hass]
//! host = "http://homeassistant.local:8123"
//! token = "long-lived-token"
//!
//! [printers.voron]
//! name = "Voron 2.4"
//! host = "http://voron.local"
//! entity_id = "switch.voron"
//! macros = [["PURGE_NOZZLE", "Purge"], ["HOME_ALL", "Home"]]
//! ```
//!
//! The table key (`voron` above) becomes the printer identifier used by every
//! API route.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub hass: Option<HassConfig>,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub printers: BTreeMap<String, PrinterEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            hass: None,
            timing: TimingConfig::default(),
            printers: BTreeMap::new(),
        }
    }
}

/// Home Assistant connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HassConfig {
    pub host: String,
    pub token: String,
}

/// Intervals and timeouts used by the supervisors, in milliseconds.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct TimingConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
        }
    }
}

impl TimingConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// A `[printers.<key>]` table as written in the file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrinterEntry {
    #[serde(default)]
    pub name: Option<String>,
    pub host: String,
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub macros: Vec<(String, String)>,
}

/// Immutable description of one printer, keyed by its identifier.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PrinterConfig {
    pub key: String,
    pub name: String,
    pub host: String,
    pub entity_id: String,
    /// Ordered (macro id, label) pairs; the ids form the run-macro allow-list.
    pub macros: Vec<(String, String)>,
}

impl PrinterConfig {
    pub fn has_macro(&self, id: &str) -> bool {
        self.macros.iter().any(|(macro_id, _)| macro_id == id)
    }

    /// Moonraker websocket endpoint derived from the HTTP host.
    pub fn websocket_url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        let ws_host = match host.strip_prefix("https") {
            Some(rest) => format!("wss{}", rest),
            None => host.replacen("http", "ws", 1),
        };
        format!("{}/websocket", ws_host)
    }
}

impl Config {
    /// Flatten the printer tables into validated, keyed printer configs.
    pub fn printer_configs(&self) -> Result<Vec<PrinterConfig>, ConfigError> {
        if self.printers.is_empty() {
            return Err(ConfigError::Invalid("no printers configured".to_string()));
        }
        self.printers
            .iter()
            .map(|(key, entry)| entry.to_printer_config(key))
            .collect()
    }
}

impl PrinterEntry {
    fn to_printer_config(&self, key: &str) -> Result<PrinterConfig, ConfigError> {
        let name = self
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| key.to_string());
        if !(self.host.starts_with("http://") || self.host.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "printer '{}': host '{}' must be an http:// or https:// URL",
                key, self.host
            )));
        }
        let mut seen = HashSet::new();
        for (id, _) in &self.macros {
            if id.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("printer '{}': empty macro id", key)));
            }
            if !seen.insert(id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "printer '{}': duplicate macro '{}'",
                    key, id
                )));
            }
        }
        Ok(PrinterConfig {
            key: key.to_string(),
            name,
            host: self.host.trim_end_matches('/').to_string(),
            entity_id: self.entity_id.clone(),
            macros: self.macros.clone(),
        })
    }
}

fn default_port() -> u16 {
    3000
}
fn default_heartbeat_interval_ms() -> u64 {
    1500
}
fn default_probe_timeout_ms() -> u64 {
    500
}
fn default_retry_interval_ms() -> u64 {
    1000
}
fn default_rpc_timeout_ms() -> u64 {
    10_000
}

pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}

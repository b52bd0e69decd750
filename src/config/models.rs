//! Configuration data structures for topogate.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and
//! carry defaults for every field, so an empty file is a valid configuration.
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "127.0.0.1:8443".to_string()
}

fn default_gateway_path() -> String {
    "gateway".to_string()
}

fn default_backend_timeout_ms() -> u64 {
    30_000
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}

/// Top-level gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Socket address the HTTP listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// First path segment of every gateway URL (`/{gateway_path}/{topology}/...`).
    #[serde(default = "default_gateway_path")]
    pub gateway_path: String,
    /// Upper bound for one backend exchange.
    #[serde(default = "default_backend_timeout_ms")]
    pub backend_timeout_ms: u64,
    /// Serve a Prometheus scrape endpoint.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    #[serde(default = "default_metrics_address")]
    pub metrics_address: String,
    #[serde(default)]
    pub topology: TopologySettings,
}

impl GatewayConfig {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            gateway_path: default_gateway_path(),
            backend_timeout_ms: default_backend_timeout_ms(),
            metrics_enabled: default_metrics_enabled(),
            metrics_address: default_metrics_address(),
            topology: TopologySettings::default(),
        }
    }
}

/// Settings of the topology directory watcher.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TopologySettings {
    /// Directory holding one descriptor file per topology.
    pub directory: PathBuf,
    /// Descriptor file extensions, without the dot.
    pub extensions: Vec<String>,
    /// Interval of the full directory scan.
    pub poll_interval_ms: u64,
    /// How long transiently failing parses are retried.
    pub parse_retry_window_ms: u64,
    pub parse_retry_delay_ms: u64,
    /// How long a redeploy keeps trying to advance a file timestamp.
    pub redeploy_window_ms: u64,
    /// Reject topologies that fail validation instead of logging.
    pub strict_validation: bool,
    /// Reconcile on file system change events in addition to polling.
    pub watch_events: bool,
}

impl TopologySettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn parse_retry_window(&self) -> Duration {
        Duration::from_millis(self.parse_retry_window_ms)
    }

    pub fn parse_retry_delay(&self) -> Duration {
        Duration::from_millis(self.parse_retry_delay_ms)
    }

    pub fn redeploy_window(&self) -> Duration {
        Duration::from_millis(self.redeploy_window_ms)
    }

    /// Whether `extension` is one of the descriptor extensions.
    pub fn accepts_extension(&self, extension: &str) -> bool {
        self.extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    }
}

impl Default for TopologySettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("conf/topologies"),
            extensions: vec!["json".to_string(), "conf".to_string()],
            poll_interval_ms: 1_000,
            parse_retry_window_ms: 250,
            parse_retry_delay_ms: 50,
            redeploy_window_ms: 1_000,
            strict_validation: false,
            watch_events: true,
        }
    }
}

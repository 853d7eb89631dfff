use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ports treated as HTTP when no explicit list is configured.
pub const DEFAULT_HTTP_PORTS: [u16; 8] = [80, 443, 3000, 5000, 8000, 8080, 8443, 9000];

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Flows without a segment for this long are evicted
    pub idle_timeout_secs: u64,
    /// How long a sequence gap may stay open before the flow is reset
    pub reorder_window_ms: u64,
    /// Cap on buffered-but-unparsed bytes per flow
    pub max_buffer_bytes: usize,
    /// Cap on concurrently tracked flows per capture worker
    pub max_flows: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 60,
            reorder_window_ms: 3_000,
            max_buffer_bytes: 1024 * 1024,
            max_flows: 65_536,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub health_paths: Vec<String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            health_paths: ["/health", "/healthz", "/ready", "/readyz", "/live", "/livez", "/ping"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct IdentifierConfig {
    /// Cluster-internal domain suffixes stripped from Host headers
    pub cluster_domains: Vec<String>,
    /// Static service registry: IP address -> service name
    pub addresses: HashMap<String, String>,
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            cluster_domains: vec![
                ".svc.cluster.local".to_string(),
                ".cluster.local".to_string(),
                ".svc".to_string(),
            ],
            addresses: HashMap::new(),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per remote call, first attempt included
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Delays are randomized by +/- this fraction
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub auto_onboard: bool,
    pub max_concurrent_syncs: usize,
    /// Origin tag attached to auto-onboarded applications
    pub origin: String,
    pub retry: RetryConfig,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.apisecapps.com".to_string(),
            api_key: None,
            timeout_secs: 30,
            auto_onboard: false,
            max_concurrent_syncs: 8,
            origin: "K8S_DAEMONSET".to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl PlatformConfig {
    /// The bearer credential with surrounding whitespace removed, if any is left.
    pub fn credential(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
    }
}

/// Where a service's endpoints live on the remote platform.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ServiceMapping {
    pub application_id: String,
    pub instance_id: String,
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "0.0.0.0".to_string(),
            port: 9477,
        }
    }
}

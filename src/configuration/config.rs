use super::service_mapping::MappingFile;
use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::{info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Command-line arguments.
///
/// Everything but the configuration file path is optional and, when given,
/// overrides the matching value from the file.
#[derive(Parser, Debug, Clone)]
#[command(name = "apiscope")]
#[command(version)]
#[command(about = "Passive HTTP endpoint discovery agent")]
pub struct CliArgs {
    /// Path to the TOML configuration file
    pub config_file: PathBuf,

    /// Interface to capture on. Repeat the flag to capture on several.
    #[arg(long = "interface")]
    pub interfaces: Vec<String>,

    /// Replay a pcap file instead of capturing live traffic
    #[arg(long)]
    pub pcap: Option<PathBuf>,

    /// Path of the durable capture log
    #[arg(long)]
    pub capture_log: Option<PathBuf>,

    /// Bearer credential for the inventory platform
    #[arg(long, env = "APISCOPE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Node name stamped on every captured exchange
    #[arg(long, env = "NODE_NAME")]
    pub node_name: Option<String>,
}

/// Application configuration.
///
/// # Fields Overview
///
/// - `node_name`: name of the node this agent runs on, copied into every record
/// - `interfaces`: interfaces captured on, one worker each
/// - `ports`: TCP ports considered HTTP; other traffic is never tracked
/// - `capture_log`: append-only JSON-lines log of every exchange
/// - `queue_capacity`: bound of the queue between capture and sync
/// - `mapping_file`: optional JSON mapping file maintained by external tooling
/// - `services`: service name -> platform application/instance
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node_name: String,
    pub interfaces: Vec<String>,
    pub ports: Vec<u16>,
    pub capture_log: PathBuf,
    pub queue_capacity: usize,
    pub mapping_file: Option<PathBuf>,
    pub tracker: TrackerConfig,
    pub normalizer: NormalizerConfig,
    pub identifier: IdentifierConfig,
    pub platform: PlatformConfig,
    pub services: HashMap<String, ServiceMapping>,
    pub web: WebConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: "unknown-node".to_string(),
            interfaces: vec!["eth0".to_string()],
            ports: DEFAULT_HTTP_PORTS.to_vec(),
            capture_log: PathBuf::from("/tmp/endpoints.jsonl"),
            queue_capacity: 10_000,
            mapping_file: None,
            tracker: TrackerConfig::default(),
            normalizer: NormalizerConfig::default(),
            identifier: IdentifierConfig::default(),
            platform: PlatformConfig::default(),
            services: HashMap::new(),
            web: WebConfig::default(),
        }
    }
}

impl Config {
    /// Reads, merges and validates the configuration found at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;

        if let Some(mapping_path) = config.mapping_file.clone() {
            if mapping_path.exists() {
                let file = MappingFile::from_path(&mapping_path)?;
                config.merge_mapping_file(&file);
            } else {
                warn!(
                    "Mapping file {} does not exist yet, it will be read once created",
                    mapping_path.display()
                );
            }
        }

        config.validate()?;
        info!(
            "Configuration loaded: {} interface(s), {} port(s), {} mapped service(s)",
            config.interfaces.len(),
            config.ports.len(),
            config.services.len()
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    /// Applies the global settings of a mapping file. The file's credential,
    /// auto-onboard flag and URL win over the TOML values.
    pub fn merge_mapping_file(&mut self, file: &MappingFile) {
        if let Some(key) = file.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            self.platform.api_key = Some(key.clone());
        }
        if let Some(flag) = file.auto_onboard_new_services {
            self.platform.auto_onboard = flag;
        }
        if let Some(url) = file.apisec_url.as_ref().filter(|u| !u.is_empty()) {
            self.platform.base_url = url.clone();
        }
    }

    pub fn apply_args(&mut self, args: &CliArgs) {
        if !args.interfaces.is_empty() {
            self.interfaces = args.interfaces.clone();
        }
        if let Some(ref log) = args.capture_log {
            self.capture_log = log.clone();
        }
        if let Some(ref key) = args.api_key {
            self.platform.api_key = Some(key.clone());
        }
        if let Some(ref node) = args.node_name {
            self.node_name = node.clone();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ports.is_empty() {
            return Err(ConfigError::NotInRange(
                "at least one monitored port is required".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::NotInRange(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.tracker.idle_timeout_secs == 0
            || self.tracker.reorder_window_ms == 0
            || self.tracker.max_buffer_bytes == 0
            || self.tracker.max_flows == 0
        {
            return Err(ConfigError::NotInRange(
                "tracker limits must be greater than 0".to_string(),
            ));
        }
        if self.platform.retry.max_attempts == 0 {
            return Err(ConfigError::NotInRange(
                "platform.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        let multiplier = self.platform.retry.multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::NotInRange(
                "platform.retry.multiplier must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.platform.retry.jitter_factor) {
            return Err(ConfigError::NotInRange(
                "platform.retry.jitter_factor must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.platform.max_concurrent_syncs == 0 {
            return Err(ConfigError::NotInRange(
                "platform.max_concurrent_syncs must be greater than 0".to_string(),
            ));
        }
        if !(self.platform.base_url.starts_with("http://")
            || self.platform.base_url.starts_with("https://"))
        {
            return Err(ConfigError::BadUrl(self.platform.base_url.clone()));
        }
        for addr in self.identifier.addresses.keys() {
            addr.parse::<IpAddr>()
                .map_err(|_| ConfigError::BadIpFormatting(addr.clone()))?;
        }
        Ok(())
    }

    /// Live capture needs at least one interface; pcap replay does not.
    pub fn validate_live_capture(&self) -> Result<(), ConfigError> {
        if self.interfaces.is_empty() {
            return Err(ConfigError::InterfacesEmpty(
                "no interface configured for live capture".to_string(),
            ));
        }
        Ok(())
    }

    /// The static service registry, parsed.
    pub fn registry_addresses(&self) -> HashMap<IpAddr, String> {
        self.identifier
            .addresses
            .iter()
            .filter_map(|(ip, name)| ip.parse().ok().map(|ip| (ip, name.clone())))
            .collect()
    }
}

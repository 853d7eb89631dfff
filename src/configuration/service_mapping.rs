//! Service → (application, instance) mappings.
//!
//! Mappings come from two places: the `[services.<name>]` tables of the TOML
//! configuration and, optionally, a JSON mapping file maintained by external
//! tooling in the platform's own format:
//!
//! ```json
//! {
//!   "apiKey": "...",
//!   "autoOnboardNewServices": false,
//!   "apisecUrl": "https://api.apisecapps.com",
//!   "serviceMappings": { "orders": { "appId": "a-1", "instanceId": "i-1" } }
//! }
//! ```
//!
//! The file is re-read on demand whenever its modification time changes, so
//! mappings written by the operator tooling are picked up without a restart.
//! File entries take precedence over TOML entries.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Deserialize;

use super::types::ServiceMapping;
use crate::error_handling::types::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingFile {
    pub api_key: Option<String>,
    pub auto_onboard_new_services: Option<bool>,
    pub apisec_url: Option<String>,
    #[serde(default)]
    pub service_mappings: HashMap<String, MappingFileEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingFileEntry {
    pub app_id: Option<String>,
    pub instance_id: Option<String>,
}

impl MappingFile {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| ConfigError::JsonError(format!("{}: {}", path.display(), e)))
    }

    /// Entries carrying both identifiers; incomplete entries are ignored.
    pub fn complete_mappings(&self) -> HashMap<String, ServiceMapping> {
        self.service_mappings
            .iter()
            .filter_map(|(name, entry)| match (&entry.app_id, &entry.instance_id) {
                (Some(app), Some(inst)) if !app.is_empty() && !inst.is_empty() => Some((
                    name.clone(),
                    ServiceMapping {
                        application_id: app.clone(),
                        instance_id: inst.clone(),
                    },
                )),
                _ => None,
            })
            .collect()
    }
}

struct FileState {
    modified: Option<SystemTime>,
    mappings: HashMap<String, ServiceMapping>,
}

/// Read-only view over the configured service mappings.
pub struct ServiceMappings {
    configured: HashMap<String, ServiceMapping>,
    file: Option<PathBuf>,
    file_state: Mutex<FileState>,
}

impl ServiceMappings {
    pub fn new(configured: HashMap<String, ServiceMapping>, file: Option<PathBuf>) -> Self {
        let mappings = Self {
            configured,
            file,
            file_state: Mutex::new(FileState {
                modified: None,
                mappings: HashMap::new(),
            }),
        };
        mappings.reload_if_changed();
        mappings
    }

    /// Looks up a service, re-reading the mapping file first if it changed.
    pub fn get(&self, service: &str) -> Option<ServiceMapping> {
        self.reload_if_changed();
        if let Some(m) = self.file_state.lock().mappings.get(service) {
            return Some(m.clone());
        }
        self.configured.get(service).cloned()
    }

    pub fn len(&self) -> usize {
        let state = self.file_state.lock();
        let extra = self
            .configured
            .keys()
            .filter(|k| !state.mappings.contains_key(*k))
            .count();
        state.mappings.len() + extra
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn reload_if_changed(&self) {
        let Some(path) = &self.file else {
            return;
        };

        let modified = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(m) => m,
            Err(e) => {
                debug!("Mapping file {} not readable: {}", path.display(), e);
                return;
            }
        };

        let mut state = self.file_state.lock();
        if state.modified == Some(modified) {
            return;
        }

        match MappingFile::from_path(path) {
            Ok(file) => {
                state.mappings = file.complete_mappings();
                state.modified = Some(modified);
                info!(
                    "Loaded {} service mappings from {}",
                    state.mappings.len(),
                    path.display()
                );
            }
            Err(e) => {
                // Keep serving the previous mappings until the file is fixed.
                warn!("Ignoring unreadable mapping file: {}", e);
                state.modified = Some(modified);
            }
        }
    }
}

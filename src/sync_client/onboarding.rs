use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use parking_lot::Mutex;

use super::platform::RemotePlatform;
use super::retry::{with_backoff, BackoffConfig};
use super::single_flight::SingleFlight;
use crate::configuration::types::ServiceMapping;
use crate::error_handling::types::SyncError;

/// Provisions an application and instance for services nobody mapped.
///
/// Onboarding is single-flight per service name and a success is remembered
/// for the lifetime of the process. An application that already exists under
/// the service's name is reused together with its first instance.
pub struct Onboarder {
    platform: Arc<dyn RemotePlatform>,
    backoff: BackoffConfig,
    flights: SingleFlight<String, Result<ServiceMapping, SyncError>>,
    onboarded: Mutex<HashMap<String, ServiceMapping>>,
}

impl Onboarder {
    pub fn new(platform: Arc<dyn RemotePlatform>, backoff: BackoffConfig) -> Self {
        Self {
            platform,
            backoff,
            flights: SingleFlight::new(),
            onboarded: Mutex::new(HashMap::new()),
        }
    }

    pub fn known(&self, service: &str) -> Option<ServiceMapping> {
        self.onboarded.lock().get(service).cloned()
    }

    pub async fn onboard(&self, service: &str) -> Result<ServiceMapping, SyncError> {
        if let Some(mapping) = self.known(service) {
            return Ok(mapping);
        }
        self.flights
            .run(service.to_string(), || self.provision(service))
            .await
    }

    async fn provision(&self, service: &str) -> Result<ServiceMapping, SyncError> {
        // A previous flight may have finished between the cache check and now.
        if let Some(mapping) = self.known(service) {
            return Ok(mapping);
        }

        let platform = &self.platform;
        let existing = with_backoff(&self.backoff, "find application", || {
            platform.find_application(service)
        })
        .await?;

        let mapping = match existing {
            Some(app) => {
                let instance_id = match app.instance_ids.first() {
                    Some(id) => id.clone(),
                    None => self.create_instance(&app.application_id, service).await?,
                };
                info!(
                    "Reusing application {} (instance {}) for service {}",
                    app.application_id, instance_id, service
                );
                ServiceMapping {
                    application_id: app.application_id,
                    instance_id,
                }
            }
            None => {
                let application_id = with_backoff(&self.backoff, "create application", || {
                    platform.create_application(service)
                })
                .await?;
                let instance_id = self.create_instance(&application_id, service).await?;
                info!(
                    "Onboarded service {}: application {}, instance {}",
                    service, application_id, instance_id
                );
                ServiceMapping {
                    application_id,
                    instance_id,
                }
            }
        };

        self.onboarded
            .lock()
            .insert(service.to_string(), mapping.clone());
        Ok(mapping)
    }

    async fn create_instance(&self, application_id: &str, service: &str) -> Result<String, SyncError> {
        let platform = &self.platform;
        with_backoff(&self.backoff, "create instance", || {
            platform.create_instance(application_id, service)
        })
        .await
    }
}

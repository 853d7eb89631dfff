use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};

use super::onboarding::Onboarder;
use super::platform::{PreviewOutcome, RemotePlatform};
use super::retry::{with_backoff, BackoffConfig};
use super::single_flight::SingleFlight;
use crate::configuration::service_mapping::ServiceMappings;
use crate::configuration::types::{PlatformConfig, ServiceMapping};
use crate::endpoint_discovery::{EndpointKey, NormalizedEndpoint, SeenSet, SyncState};
use crate::error_handling::types::SyncError;

/// Drives each discovered endpoint key to a terminal [`SyncState`].
///
/// ```text
/// Discovered -> Previewing -> Matched
///                   |
///                   +-------> Creating -> Synced
///
/// Previewing / Creating -> Failed   (permanent error or retries exhausted)
/// Discovered -> Skipped             (unmapped service, auto-onboarding off)
/// ```
///
/// Every transition is written to the shared [`SeenSet`]. At most one sync
/// runs per key; concurrent callers for the same key share its result.
pub struct Synchronizer {
    platform: Arc<dyn RemotePlatform>,
    mappings: Arc<ServiceMappings>,
    seen: Arc<SeenSet>,
    onboarder: Onboarder,
    auto_onboard: bool,
    backoff: BackoffConfig,
    flights: SingleFlight<EndpointKey, SyncState>,
    credential_reported: AtomicBool,
}

impl Synchronizer {
    pub fn new(
        platform: Arc<dyn RemotePlatform>,
        mappings: Arc<ServiceMappings>,
        seen: Arc<SeenSet>,
        config: &PlatformConfig,
    ) -> Self {
        let backoff = BackoffConfig::from(&config.retry);
        Self {
            onboarder: Onboarder::new(platform.clone(), backoff.clone()),
            platform,
            mappings,
            seen,
            auto_onboard: config.auto_onboard,
            backoff,
            flights: SingleFlight::new(),
            credential_reported: AtomicBool::new(false),
        }
    }

    pub fn seen(&self) -> &Arc<SeenSet> {
        &self.seen
    }

    /// Syncs one endpoint and returns the terminal state it reached.
    pub async fn sync(&self, endpoint: NormalizedEndpoint) -> SyncState {
        let key = endpoint.key.clone();
        self.flights
            .run(key, || self.sync_once(&endpoint))
            .await
    }

    async fn sync_once(&self, endpoint: &NormalizedEndpoint) -> SyncState {
        let key = &endpoint.key;
        if let Some(state) = self.seen.state(key).filter(SyncState::is_terminal) {
            return state;
        }

        let mapping = match self.resolve_mapping(&key.service).await {
            Ok(Some(mapping)) => mapping,
            Ok(None) => {
                info!(
                    "Skipped {}: service is not mapped and auto-onboarding is disabled",
                    key
                );
                return self.transition(key, SyncState::Skipped);
            }
            Err(e) => return self.fail(key, e),
        };

        match self.run_remote(endpoint, &mapping).await {
            Ok(state) => self.transition(key, state),
            Err(e) => self.fail(key, e),
        }
    }

    async fn resolve_mapping(&self, service: &str) -> Result<Option<ServiceMapping>, SyncError> {
        if let Some(mapping) = self.mappings.get(service) {
            return Ok(Some(mapping));
        }
        if !self.auto_onboard {
            return Ok(None);
        }
        self.onboarder.onboard(service).await.map(Some)
    }

    async fn run_remote(
        &self,
        endpoint: &NormalizedEndpoint,
        mapping: &ServiceMapping,
    ) -> Result<SyncState, SyncError> {
        let key = &endpoint.key;
        let platform = &self.platform;

        self.transition(key, SyncState::Previewing);
        let preview = with_backoff(&self.backoff, "preview", || {
            platform.preview_endpoint(mapping, &key.method, &endpoint.example_path)
        })
        .await?;

        if let PreviewOutcome::Matched {
            endpoint_id,
            template,
        } = preview
        {
            info!(
                "Matched {} to existing endpoint {}",
                key,
                template.as_deref().unwrap_or("?")
            );
            return Ok(SyncState::Matched { endpoint_id });
        }

        self.transition(key, SyncState::Creating);
        let endpoint_id = with_backoff(&self.backoff, "create endpoint", || {
            platform.create_endpoint(mapping, &key.method, &key.template)
        })
        .await?;
        info!(
            "Created endpoint {} in application {}",
            key, mapping.application_id
        );
        Ok(SyncState::Synced { endpoint_id })
    }

    fn transition(&self, key: &EndpointKey, state: SyncState) -> SyncState {
        debug!("{} -> {:?}", key, state);
        self.seen.set_state(key, state.clone());
        state
    }

    fn fail(&self, key: &EndpointKey, err: SyncError) -> SyncState {
        match &err {
            SyncError::Unauthorized(_) | SyncError::MissingCredential => {
                if !self.credential_reported.swap(true, Ordering::SeqCst) {
                    error!(
                        "Platform credential problem, endpoints will not sync until it is fixed: {}",
                        err
                    );
                } else {
                    debug!("Sync of {} failed: {}", key, err);
                }
            }
            SyncError::Transient(_) => error!("Giving up on {} after retries: {}", key, err),
            _ => warn!("Sync of {} failed: {}", key, err),
        }
        self.transition(
            key,
            SyncState::Failed {
                reason: err.to_string(),
            },
        )
    }
}

use std::fmt;

use serde::Serialize;

/// Identity of one API endpoint of one service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EndpointKey {
    pub service: String,
    pub method: String,
    pub template: String,
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.service, self.method, self.template)
    }
}

/// An endpoint key plus one concrete path it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEndpoint {
    pub key: EndpointKey,
    /// Query-free path as observed, used when asking the platform for a match.
    pub example_path: String,
}

/// Where an endpoint key stands with the remote platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    Discovered,
    Previewing,
    /// The platform already knows the endpoint.
    Matched { endpoint_id: Option<String> },
    Creating,
    /// The endpoint was created on the platform.
    Synced { endpoint_id: Option<String> },
    Failed { reason: String },
    /// The service has no mapping and auto-onboarding is off.
    Skipped,
}

impl SyncState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncState::Matched { .. }
                | SyncState::Synced { .. }
                | SyncState::Failed { .. }
                | SyncState::Skipped
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dedupe {
    New,
    AlreadySeen,
}

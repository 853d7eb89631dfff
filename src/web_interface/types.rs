use serde::Serialize;

use crate::endpoint_discovery::{EndpointKey, SyncState};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub node: String,
    pub endpoints: usize,
}

/// One row of `GET /endpoints`.
#[derive(Serialize)]
pub struct EndpointResponse {
    #[serde(flatten)]
    pub key: EndpointKey,
    #[serde(flatten)]
    pub state: SyncState,
}

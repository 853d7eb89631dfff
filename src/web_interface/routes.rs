use std::sync::Arc;

use warp::{reply, Filter, Rejection, Reply};

use super::types::{EndpointResponse, HealthResponse};
use crate::endpoint_discovery::SeenSet;

/// GET /healthz
pub fn health_route(
    seen: Arc<SeenSet>,
    node: String,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("healthz")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || {
            reply::json(&HealthResponse {
                status: "ok",
                node: node.clone(),
                endpoints: seen.len(),
            })
        })
}

/// GET /endpoints
pub fn endpoints_route(
    seen: Arc<SeenSet>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("endpoints")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || {
            let rows: Vec<EndpointResponse> = seen
                .snapshot()
                .into_iter()
                .map(|(key, state)| EndpointResponse { key, state })
                .collect();
            reply::json(&rows)
        })
}

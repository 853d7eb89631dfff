use std::net::SocketAddr;
use std::sync::Arc;

use log::info;
use tokio::task::JoinHandle;
use warp::{Filter, Rejection, Reply};

use super::routes::{endpoints_route, health_route};
use crate::endpoint_discovery::SeenSet;

/// Status server: agent liveness and a read-only view of discovered endpoints.
pub struct WebServer {
    seen: Arc<SeenSet>,
    node: String,
}

impl WebServer {
    pub fn new(seen: Arc<SeenSet>, node: &str) -> Self {
        Self {
            seen,
            node: node.to_string(),
        }
    }

    pub fn routes(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        health_route(self.seen.clone(), self.node.clone()).or(endpoints_route(self.seen.clone()))
    }

    /// Serves on `addr` in a background task; abort the handle to stop it.
    pub fn start(&self, addr: SocketAddr) -> JoinHandle<()> {
        info!("Status server listening on http://{}", addr);
        tokio::spawn(warp::serve(self.routes()).run(addr))
    }
}

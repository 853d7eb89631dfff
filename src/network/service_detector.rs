use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use log::trace;

use super::service_registry::ServiceRegistry;
use crate::configuration::types::IdentifierConfig;
use crate::http_reconstruction::types::ExchangeRecord;

/// Maps reconstructed exchanges to the logical service they were sent to.
///
/// The `Host` header wins; when it is missing or an IP literal the server
/// address is looked up in the registry. Registry answers are cached for the
/// lifetime of the detector, which is owned by a single capture worker.
pub struct ServiceDetector {
    cluster_domains: Vec<String>,
    registry: Arc<dyn ServiceRegistry>,
    cache: HashMap<IpAddr, Option<String>>,
}

impl ServiceDetector {
    pub fn new(config: &IdentifierConfig, registry: Arc<dyn ServiceRegistry>) -> Self {
        let mut cluster_domains: Vec<String> = config
            .cluster_domains
            .iter()
            .map(|d| {
                let d = d.trim().to_ascii_lowercase();
                if d.starts_with('.') {
                    d
                } else {
                    format!(".{}", d)
                }
            })
            .collect();
        // Longest suffix first so `.svc.cluster.local` beats `.cluster.local`.
        cluster_domains.sort_by_key(|d| std::cmp::Reverse(d.len()));

        Self {
            cluster_domains,
            registry,
            cache: HashMap::new(),
        }
    }

    pub fn identify(&mut self, record: &ExchangeRecord) -> Option<String> {
        if let Some(service) = record.host.as_deref().and_then(|h| self.service_from_host(h)) {
            return Some(service);
        }

        let addr = record.server_addr.ip();
        let registry = &self.registry;
        let service = self
            .cache
            .entry(addr)
            .or_insert_with(|| registry.resolve(addr))
            .clone();
        trace!("{} resolved through registry to {:?}", addr, service);
        service
    }

    pub fn enrich(&mut self, record: ExchangeRecord) -> ExchangeRecord {
        let service = self.identify(&record);
        record.with_service(service)
    }

    /// Service name carried by a Host header value, `None` for IP literals.
    ///
    /// `orders.shop.svc.cluster.local:8080` gives `orders`; a host outside
    /// the cluster domains is kept whole, lowercased.
    pub fn service_from_host(&self, host: &str) -> Option<String> {
        let host = host.trim();
        let host = host.rsplit_once('@').map_or(host, |(_, h)| h);

        if host.starts_with('[') || host.parse::<IpAddr>().is_ok() {
            return None;
        }
        let name = match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            Some(_) => return None,
            None => host,
        };
        let name = name.trim_end_matches('.').to_ascii_lowercase();
        if name.is_empty() || name.parse::<IpAddr>().is_ok() {
            return None;
        }

        for domain in &self.cluster_domains {
            if let Some(stripped) = name.strip_suffix(domain.as_str()) {
                return stripped
                    .split('.')
                    .next()
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
            }
        }
        Some(name)
    }
}

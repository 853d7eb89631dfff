use std::collections::HashSet;

use log::trace;
use regex::Regex;

use super::types::{EndpointKey, NormalizedEndpoint};
use crate::configuration::types::NormalizerConfig;
use crate::http_reconstruction::types::ExchangeRecord;

/// Minimum length of an opaque token segment.
const TOKEN_MIN_LEN: usize = 20;

struct SegmentPatterns {
    uuid: Regex,
    numeric: Regex,
    hex: Regex,
    prefixed: Regex,
    token: Regex,
}

impl SegmentPatterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            uuid: Regex::new(
                r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$",
            )?,
            numeric: Regex::new(r"^\d+$")?,
            hex: Regex::new(r"(?i)^[0-9a-f]{16,}$")?,
            prefixed: Regex::new(r"(?i)^([a-z]{2,5})_([a-z0-9]{6,})$")?,
            token: Regex::new(r"^[A-Za-z0-9_\-]+$")?,
        })
    }

    /// Placeholder for a variable segment, `None` for a literal one.
    fn placeholder(&self, segment: &str) -> Option<String> {
        if self.uuid.is_match(segment) {
            return Some("{uuid}".to_string());
        }
        if self.numeric.is_match(segment) {
            return Some("{id}".to_string());
        }
        if self.hex.is_match(segment) {
            return Some("{hash}".to_string());
        }
        // Short suffixes such as `api_v2` stay literal.
        if let Some(caps) = self.prefixed.captures(segment) {
            if caps[2].bytes().any(|b| b.is_ascii_digit()) {
                return Some(format!("{{{}_id}}", caps[1].to_ascii_lowercase()));
            }
        }
        if segment.len() >= TOKEN_MIN_LEN
            && self.token.is_match(segment)
            && segment.bytes().any(|b| b.is_ascii_digit())
            && segment.bytes().any(|b| b.is_ascii_alphabetic())
        {
            return Some("{token}".to_string());
        }
        None
    }
}

/// Collapses concrete request paths into endpoint templates.
///
/// `/api/v1/users/42?expand=true` becomes `/api/v1/users/{id}`; UUIDs, long
/// hex strings, prefixed ids such as `cus_9f8a7b` and long opaque tokens get
/// their own placeholders. Health-check paths never produce a key.
pub struct EndpointNormalizer {
    health_paths: HashSet<String>,
    patterns: SegmentPatterns,
}

impl EndpointNormalizer {
    pub fn new(config: &NormalizerConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            health_paths: config
                .health_paths
                .iter()
                .map(|p| p.trim().to_string())
                .collect(),
            patterns: SegmentPatterns::new()?,
        })
    }

    /// Only request records with a resolved service normalize.
    pub fn normalize(&self, record: &ExchangeRecord) -> Option<NormalizedEndpoint> {
        if !record.is_request() {
            return None;
        }
        let service = record.service.as_ref()?;
        let method = record.method.as_ref()?.to_ascii_uppercase();
        let path = strip_query(record.path.as_deref()?);

        if !path.starts_with('/') {
            return None;
        }
        if self.health_paths.contains(path) {
            trace!("Ignoring health check {} {}", method, path);
            return None;
        }

        Some(NormalizedEndpoint {
            key: EndpointKey {
                service: service.clone(),
                method,
                template: self.template(path),
            },
            example_path: path.to_string(),
        })
    }

    /// Template of a query-free path: empty segments and a trailing slash
    /// are dropped, variable segments replaced.
    pub fn template(&self, path: &str) -> String {
        let segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| self.patterns.placeholder(s).unwrap_or_else(|| s.to_string()))
            .collect();
        format!("/{}", segments.join("/"))
    }
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

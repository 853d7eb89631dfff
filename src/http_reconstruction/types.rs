use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Request,
    Response,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Header fields in wire order. Lookups ignore case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Whether a comma-separated header such as `Connection` lists `token`.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends to the value of the last header (obsolete line folding).
    pub(crate) fn continue_last(&mut self, more: &str) -> bool {
        match self.0.last_mut() {
            Some(last) => {
                last.value.push(' ');
                last.value.push_str(more);
                true
            }
            None => false,
        }
    }
}

/// One reconstructed HTTP message with the flow it travelled on.
///
/// # Fields Overview
///
/// - `id`: unique per record
/// - `correlation_id`: shared by a request and its final response; interim
///   (1xx) responses carry `{request correlation}-i{n}`
/// - `method`, `path`, `full_url`: from the request; copied onto the paired
///   response, absent on an unpaired one
/// - `status_code`, `status_text`: responses only
/// - `service`: filled in by the service identifier after parsing
/// - `body_bytes`: decoded body length (chunk framing excluded)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub id: Uuid,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub node: String,
    pub interface: String,
    pub client_addr: SocketAddr,
    pub server_addr: SocketAddr,
    pub service: Option<String>,
    pub host: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub full_url: Option<String>,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    pub headers: Headers,
    pub body_bytes: usize,
}

impl ExchangeRecord {
    pub fn with_service(self, service: Option<String>) -> Self {
        Self { service, ..self }
    }

    pub fn is_request(&self) -> bool {
        self.direction == Direction::Request
    }
}

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::multipart::{Form, Part};
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde_json::{json, Value};

use super::platform::{ApplicationRef, PreviewOutcome, RemotePlatform};
use crate::configuration::types::{PlatformConfig, ServiceMapping};
use crate::error_handling::types::SyncError;

/// Longest error body kept in a `SyncError`.
const ERROR_BODY_LIMIT: usize = 512;

/// [`RemotePlatform`] over the platform's HTTPS API.
///
/// Every request carries `Authorization: Bearer <credential>`. Transport
/// failures surface as [`SyncError::Transient`], non-success statuses go
/// through [`SyncError::from_status`].
pub struct HttpPlatform {
    client: reqwest::Client,
    base_url: String,
    credential: Option<String>,
    origin: String,
}

#[derive(Deserialize)]
struct PreviewResponse {
    #[serde(default)]
    matched: bool,
    endpoint: Option<Value>,
}

impl HttpPlatform {
    pub fn new(config: &PlatformConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credential: config.credential(),
            origin: config.origin.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn instance_url(&self, mapping: &ServiceMapping, action: &str) -> String {
        self.url(&format!(
            "/v1/applications/{}/instances/{}/{}",
            mapping.application_id, mapping.instance_id, action
        ))
    }

    /// Sends an authorized request and returns the raw success body.
    async fn send(&self, request: RequestBuilder) -> Result<String, SyncError> {
        let credential = self.credential.as_deref().ok_or(SyncError::MissingCredential)?;
        let response = request
            .bearer_auth(credential)
            .send()
            .await
            .map_err(|e| SyncError::Transient(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Transient(e.to_string()))?;
        debug!("Platform answered HTTP {} ({} bytes)", status.as_u16(), body.len());

        if status.is_success() {
            Ok(body)
        } else {
            Err(SyncError::from_status(status.as_u16(), truncate(body)))
        }
    }

    async fn send_json(&self, request: RequestBuilder) -> Result<Value, SyncError> {
        let body = self.send(request).await?;
        parse_json(&body)
    }

    async fn first_instance_of(&self, application_id: &str) -> Result<Option<String>, SyncError> {
        let app = self
            .send_json(self.client.get(self.url(&format!("/v1/applications/{}", application_id))))
            .await?;
        Ok(app
            .get("instances")
            .and_then(Value::as_array)
            .and_then(|instances| instances.first())
            .and_then(|i| string_field(i, &["instanceId"])))
    }
}

#[async_trait]
impl RemotePlatform for HttpPlatform {
    async fn preview_endpoint(
        &self,
        mapping: &ServiceMapping,
        method: &str,
        path: &str,
    ) -> Result<PreviewOutcome, SyncError> {
        let request = self
            .client
            .post(self.instance_url(mapping, "endpoints/preview"))
            .json(&json!({ "method": method, "path": path }));
        let body = self.send(request).await?;
        let preview: PreviewResponse = serde_json::from_str(&body)
            .map_err(|e| SyncError::InvalidResponse(format!("preview: {}", e)))?;

        if !preview.matched {
            return Ok(PreviewOutcome::NoMatch);
        }
        let endpoint = preview.endpoint.unwrap_or(Value::Null);
        Ok(PreviewOutcome::Matched {
            endpoint_id: string_field(&endpoint, &["id", "endpointId"]),
            template: string_field(&endpoint, &["path"]),
        })
    }

    async fn create_endpoint(
        &self,
        mapping: &ServiceMapping,
        method: &str,
        template: &str,
    ) -> Result<Option<String>, SyncError> {
        let request = self
            .client
            .post(self.instance_url(mapping, "add-endpoints"))
            .json(&json!([{
                "method": method.to_ascii_lowercase(),
                "endpoint": template,
                "payload": "",
            }]));
        let body = self.send(request).await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        Ok(first_id(&parse_json(&body)?, &["id", "endpointId"]))
    }

    async fn find_application(&self, name: &str) -> Result<Option<ApplicationRef>, SyncError> {
        let listing = self
            .send_json(
                self.client
                    .get(self.url("/v1/applications"))
                    .query(&[("include", "metadata")]),
            )
            .await?;

        let applications = listing
            .get("applications")
            .unwrap_or(&listing)
            .as_array()
            .ok_or_else(|| SyncError::InvalidResponse("application list is not an array".into()))?;

        Ok(applications
            .iter()
            .filter(|app| app.get("applicationName").and_then(Value::as_str) == Some(name))
            .find_map(|app| {
                let application_id = string_field(app, &["applicationId"])?;
                let instance_ids = app
                    .get("instances")
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .filter_map(|i| string_field(i, &["instanceId"]))
                            .collect()
                    })
                    .unwrap_or_default();
                Some(ApplicationRef {
                    application_id,
                    instance_ids,
                })
            }))
    }

    async fn create_application(&self, name: &str) -> Result<String, SyncError> {
        let document = serde_json::to_vec(&minimal_openapi(name))
            .map_err(|e| SyncError::OnboardingFailed(e.to_string()))?;
        let upload = Part::bytes(document)
            .file_name("openapi-spec.json")
            .mime_str("application/json")
            .map_err(|e| SyncError::OnboardingFailed(e.to_string()))?;
        let form = Form::new()
            .part("fileUpload", upload)
            .text("applicationName", name.to_string())
            .text("origin", self.origin.clone());

        let created = self
            .send_json(self.client.post(self.url("/v1/applications/oas")).multipart(form))
            .await?;
        string_field(&created, &["applicationId"]).ok_or_else(|| {
            SyncError::OnboardingFailed(format!("no applicationId returned for {}", name))
        })
    }

    async fn create_instance(
        &self,
        application_id: &str,
        service: &str,
    ) -> Result<String, SyncError> {
        let request = self
            .client
            .post(self.url(&format!("/v1/applications/{}/instances/batch", application_id)))
            .json(&json!({
                "instanceRequestItems": [{
                    "hostUrl": "/",
                    "instanceName": format!("{}_instance", service),
                }]
            }));
        let body = self.send(request).await?;

        let from_batch = if body.trim().is_empty() {
            None
        } else {
            let value = parse_json(&body)?;
            first_id(&value, &["instanceId"]).or_else(|| {
                value
                    .get("items")
                    .and_then(|items| first_id(items, &["instanceId"]))
            })
        };
        if let Some(instance_id) = from_batch {
            return Ok(instance_id);
        }

        info!(
            "No instanceId in batch response for application {}, reading it back",
            application_id
        );
        self.first_instance_of(application_id).await?.ok_or_else(|| {
            SyncError::OnboardingFailed(format!(
                "application {} has no instance after creation",
                application_id
            ))
        })
    }
}

fn minimal_openapi(service: &str) -> Value {
    json!({
        "openapi": "3.0.0",
        "info": {
            "title": service,
            "version": "1.0.0",
            "description": format!("Auto-onboarded service: {}", service),
        },
        "servers": [{ "url": "/", "description": "Default server" }],
        "paths": {},
    })
}

fn parse_json(body: &str) -> Result<Value, SyncError> {
    serde_json::from_str(body).map_err(|e| SyncError::InvalidResponse(e.to_string()))
}

/// First of `keys` present on `value` as a string or number.
fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Id carried by an object, or by the first element of a list.
fn first_id(value: &Value, keys: &[&str]) -> Option<String> {
    match value {
        Value::Array(items) => items.first().and_then(|item| first_id(item, keys)),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        other => string_field(other, keys),
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

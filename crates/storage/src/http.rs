//! HTTP-backed remote storage adapter.
//!
//! Speaks a small REST protocol:
//!   PUT    /workflows/{urlEncodedId}   body = state JSON
//!   GET    /workflows/{id}             → state JSON, or 404
//!   DELETE /workflows/{id}             404 tolerated
//!   GET    /workflows                  → `[...]`, `{ids:[...]}`, or
//!                                        `{workflows:[{id,...}]}`
//!   GET    /health                     optional connection test
//!
//! A bearer credential is attached as `Authorization: Bearer <apiKey>` when
//! configured.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::{StorageAdapter, StorageError};

/// Connection settings for [`HttpStorage`].
#[derive(Debug, Clone)]
pub struct HttpStorageConfig {
    /// Server root, e.g. `https://flows.example.com/api`.
    pub base_url: String,
    /// Optional bearer credential.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl HttpStorageConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub struct HttpStorage {
    client: reqwest::Client,
    config: HttpStorageConfig,
}

impl HttpStorage {
    pub fn new(config: HttpStorageConfig) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    /// Probe `GET /health`.  Useful as a connection test before first use.
    pub async fn health_check(&self) -> Result<(), StorageError> {
        let response = self.request(Method::GET, "health").send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_for(response.status(), "health check failed"))
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let base = self.config.base_url.trim_end_matches('/');
        let mut builder = self.client.request(method, format!("{base}/{path}"));
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }
}

#[async_trait]
impl StorageAdapter for HttpStorage {
    async fn save(&self, id: &str, state: &Value) -> Result<(), StorageError> {
        let path = format!("workflows/{}", encode_id(id));
        debug!("PUT {path}");
        let response = self.request(Method::PUT, &path).json(state).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_for(response.status(), "save failed"))
        }
    }

    async fn load(&self, id: &str) -> Result<Option<Value>, StorageError> {
        let path = format!("workflows/{}", encode_id(id));
        let response = self.request(Method::GET, &path).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(error_for(status, "load failed")),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let path = format!("workflows/{}", encode_id(id));
        let response = self.request(Method::DELETE, &path).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(error_for(status, "delete failed")),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let response = self.request(Method::GET, "workflows").send().await?;
        if !response.status().is_success() {
            return Err(error_for(response.status(), "list failed"));
        }
        parse_list_response(&response.json().await?)
    }
}

fn error_for(status: StatusCode, message: &str) -> StorageError {
    StorageError::Http {
        status: status.as_u16(),
        message: message.to_owned(),
    }
}

/// Percent-encode a workflow id for use as a single path segment.
fn encode_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// Accept the three list shapes servers are known to answer with.
fn parse_list_response(body: &Value) -> Result<Vec<String>, StorageError> {
    if let Some(items) = body.as_array() {
        return collect_ids(items);
    }
    if let Some(items) = body.get("ids").and_then(Value::as_array) {
        return collect_ids(items);
    }
    if let Some(items) = body.get("workflows").and_then(Value::as_array) {
        return items
            .iter()
            .map(|item| {
                item.get("id")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .ok_or(StorageError::MalformedListResponse)
            })
            .collect();
    }
    Err(StorageError::MalformedListResponse)
}

fn collect_ids(items: &[Value]) -> Result<Vec<String>, StorageError> {
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_owned)
                .ok_or(StorageError::MalformedListResponse)
        })
        .collect()
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_percent_encoded_for_the_path() {
        assert_eq!(encode_id("wf-1"), "wf-1");
        assert_eq!(encode_id("parent.child"), "parent.child");
        assert_eq!(encode_id("wf/1 x"), "wf%2F1%20x");
    }

    #[test]
    fn list_accepts_bare_array() {
        let ids = parse_list_response(&json!(["a", "b"])).unwrap();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn list_accepts_ids_envelope() {
        let ids = parse_list_response(&json!({ "ids": ["a", "b"] })).unwrap();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn list_accepts_workflows_envelope() {
        let body = json!({ "workflows": [{ "id": "a", "name": "A" }, { "id": "b" }] });
        let ids = parse_list_response(&body).unwrap();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn unknown_list_shape_is_rejected() {
        let err = parse_list_response(&json!({ "nope": true })).unwrap_err();
        assert!(matches!(err, StorageError::MalformedListResponse));
    }
}

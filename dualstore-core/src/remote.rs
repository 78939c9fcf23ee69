//! HTTP client for the backend store.
//!
//! Every call takes the base URL chosen by discovery, so one client can be
//! shared before and after a backend has been found.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol::Envelope;
use crate::record::Record;

/// Errors returned by backend calls.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// Connection refused, DNS failure, timeout.
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    /// The backend answered with `isOk: false` or an error status.
    #[error("Backend rejected request: {0}")]
    Rejected(String),

    /// The backend answered with a body that is not a valid envelope.
    #[error("Invalid backend response: {0}")]
    Decode(String),
}

/// Operations the reconciliation layer needs from a backend store.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Liveness probe against `GET /api/health`.
    async fn health(&self, base_url: &str) -> Result<(), RemoteError>;

    /// All records, `GET /api/data`.
    async fn fetch_all(&self, base_url: &str) -> Result<Vec<Record>, RemoteError>;

    /// Inserts a record and returns the backend-assigned id.
    async fn create(&self, base_url: &str, record: &Record) -> Result<i64, RemoteError>;

    /// Replaces the payload of the row `backend_id`.
    async fn update(
        &self,
        base_url: &str,
        backend_id: i64,
        record: &Record,
    ) -> Result<(), RemoteError>;

    async fn delete(&self, base_url: &str, backend_id: i64) -> Result<(), RemoteError>;
}

/// Body sent on create/update: the type tag plus the payload.
///
/// Local ids and timestamps stay on the client; the backend owns its own.
pub fn wire_body(record: &Record) -> Value {
    let mut body = Map::with_capacity(record.payload.len() + 1);
    body.insert("type".to_string(), Value::String(record.record_type.clone()));
    for (key, value) in &record.payload {
        body.insert(key.clone(), value.clone());
    }
    Value::Object(body)
}

/// `Backend` over HTTP with JSON bodies.
#[derive(Debug, Clone, Default)]
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client with a per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;
        Ok(Self { client })
    }

    fn url(base_url: &str, path: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), path)
    }

    /// Decodes an envelope, mapping `isOk: false` and error statuses to `Rejected`.
    async fn read_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<Envelope<T>, RemoteError> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;

        match serde_json::from_str::<Envelope<T>>(&text) {
            Ok(envelope) => envelope.into_result().map_err(RemoteError::Rejected),
            Err(_) if !status.is_success() => Err(RemoteError::Rejected(format!(
                "Server returned status {}",
                status
            ))),
            Err(e) => Err(RemoteError::Decode(e.to_string())),
        }
    }
}

fn transport(e: reqwest::Error) -> RemoteError {
    RemoteError::Unreachable(e.to_string())
}

#[async_trait]
impl Backend for HttpBackend {
    async fn health(&self, base_url: &str) -> Result<(), RemoteError> {
        let response = self
            .client
            .get(Self::url(base_url, "/api/health"))
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(RemoteError::Unreachable(format!(
                "Health check returned status {}",
                response.status()
            )));
        }

        Self::read_envelope::<Value>(response).await.map(|_| ())
    }

    async fn fetch_all(&self, base_url: &str) -> Result<Vec<Record>, RemoteError> {
        let response = self
            .client
            .get(Self::url(base_url, "/api/data"))
            .send()
            .await
            .map_err(transport)?;

        let envelope = Self::read_envelope::<Vec<Record>>(response).await?;
        Ok(envelope.data.unwrap_or_default())
    }

    async fn create(&self, base_url: &str, record: &Record) -> Result<i64, RemoteError> {
        let response = self
            .client
            .post(Self::url(base_url, "/api/data"))
            .json(&wire_body(record))
            .send()
            .await
            .map_err(transport)?;

        let envelope = Self::read_envelope::<Value>(response).await?;
        envelope
            .id
            .as_ref()
            .and_then(|id| id.as_i64().or_else(|| id.as_str().and_then(|s| s.parse().ok())))
            .ok_or_else(|| RemoteError::Decode("create response carried no id".to_string()))
    }

    async fn update(
        &self,
        base_url: &str,
        backend_id: i64,
        record: &Record,
    ) -> Result<(), RemoteError> {
        let response = self
            .client
            .put(Self::url(base_url, &format!("/api/data/{}", backend_id)))
            .json(&wire_body(record))
            .send()
            .await
            .map_err(transport)?;

        Self::read_envelope::<Value>(response).await.map(|_| ())
    }

    async fn delete(&self, base_url: &str, backend_id: i64) -> Result<(), RemoteError> {
        let response = self
            .client
            .delete(Self::url(base_url, &format!("/api/data/{}", backend_id)))
            .send()
            .await
            .map_err(transport)?;

        Self::read_envelope::<Value>(response).await.map(|_| ())
    }
}

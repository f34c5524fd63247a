//! Regulator API adapter port and failure classification.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use harvestry_core::LicenseNumber;
use harvestry_sync::{Endpoint, HttpMethod};

use super::credentials::LicenseCredentials;

/// Per-call context handed to the adapter.
#[derive(Debug, Clone, Copy)]
pub struct ApiContext<'a> {
    pub license_number: &'a LicenseNumber,
    /// Jurisdiction base URL (sandbox or production)
    pub base_url: &'a str,
    pub credentials: &'a LicenseCredentials,
}

/// How a failed call should be treated by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureClass {
    /// Retry with backoff
    Transient,
    /// The request itself is invalid; retrying cannot help
    Permanent,
    /// The regulator already holds this identifier; needs a human
    Conflict,
}

/// Regulator response, already decoded by the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub is_success: bool,
    pub status_code: u16,
    pub error_message: Option<String>,
    pub body: Option<serde_json::Value>,
    /// Adapter-supplied classification; overrides status-code rules.
    pub hint: Option<FailureClass>,
}

impl ApiResponse {
    pub fn ok(status_code: u16, body: Option<serde_json::Value>) -> Self {
        Self {
            is_success: true,
            status_code,
            error_message: None,
            body,
            hint: None,
        }
    }

    pub fn error(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            is_success: false,
            status_code,
            error_message: Some(message.into()),
            body: None,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: FailureClass) -> Self {
        self.hint = Some(hint);
        self
    }

    /// Regulator id from the body (`Id`), if it returned one.
    pub fn external_id(&self) -> Option<i64> {
        self.body.as_ref()?.get("Id")?.as_i64()
    }

    /// Regulator label/tag from the body (`Label`), if it returned one.
    pub fn external_label(&self) -> Option<String> {
        self.body
            .as_ref()?
            .get("Label")?
            .as_str()
            .map(str::to_string)
    }

    /// Message recorded on the queue item.
    pub fn failure_message(&self) -> String {
        match &self.error_message {
            Some(msg) if !msg.trim().is_empty() => msg.clone(),
            _ => format!("regulator returned HTTP {}", self.status_code),
        }
    }
}

/// Error raised when no response was obtained at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegulatorError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("regulator call timed out after {0:?}")]
    Timeout(Duration),
    /// Adapter bug or unexpected condition while building/decoding a call.
    #[error("unexpected adapter error: {0}")]
    Unexpected(String),
}

impl RegulatorError {
    pub fn code(&self) -> &'static str {
        match self {
            RegulatorError::Transport(_) => "TRANSPORT",
            RegulatorError::Timeout(_) => "TIMEOUT",
            RegulatorError::Unexpected(_) => "EXCEPTION",
        }
    }
}

/// Wire-level client for one regulator (out of scope here; plugged in by the host).
#[async_trait]
pub trait RegulatorApi: Send + Sync {
    async fn get(&self, ctx: ApiContext<'_>, path: &str) -> Result<ApiResponse, RegulatorError>;

    async fn post(
        &self,
        ctx: ApiContext<'_>,
        path: &str,
        payload: &serde_json::Value,
    ) -> Result<ApiResponse, RegulatorError>;

    async fn put(
        &self,
        ctx: ApiContext<'_>,
        path: &str,
        payload: &serde_json::Value,
    ) -> Result<ApiResponse, RegulatorError>;

    async fn delete(&self, ctx: ApiContext<'_>, path: &str) -> Result<ApiResponse, RegulatorError>;
}

/// Route a resolved endpoint to the matching adapter verb.
pub async fn dispatch(
    api: &dyn RegulatorApi,
    ctx: ApiContext<'_>,
    endpoint: &Endpoint,
    payload: &serde_json::Value,
) -> Result<ApiResponse, RegulatorError> {
    match endpoint.method {
        HttpMethod::Get => api.get(ctx, &endpoint.path).await,
        HttpMethod::Post => api.post(ctx, &endpoint.path, payload).await,
        HttpMethod::Put => api.put(ctx, &endpoint.path, payload).await,
        HttpMethod::Delete => api.delete(ctx, &endpoint.path).await,
    }
}

/// Classify a non-success response.
///
/// Adapter hint first; otherwise 409 is a conflict, 408/425/429 and 5xx are
/// transient, remaining 4xx are permanent. A status of 0 (no HTTP status
/// observed) is transient.
pub fn classify(response: &ApiResponse) -> FailureClass {
    if let Some(hint) = response.hint {
        return hint;
    }
    match response.status_code {
        409 => FailureClass::Conflict,
        408 | 425 | 429 => FailureClass::Transient,
        400..=499 => FailureClass::Permanent,
        _ => FailureClass::Transient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ranges_classify() {
        assert_eq!(classify(&ApiResponse::error(409, "dup")), FailureClass::Conflict);
        assert_eq!(classify(&ApiResponse::error(429, "slow down")), FailureClass::Transient);
        assert_eq!(classify(&ApiResponse::error(408, "timeout")), FailureClass::Transient);
        assert_eq!(classify(&ApiResponse::error(400, "bad tag")), FailureClass::Permanent);
        assert_eq!(classify(&ApiResponse::error(404, "gone")), FailureClass::Permanent);
        assert_eq!(classify(&ApiResponse::error(503, "down")), FailureClass::Transient);
        assert_eq!(classify(&ApiResponse::error(0, "no status")), FailureClass::Transient);
    }

    #[test]
    fn hint_overrides_status() {
        let response = ApiResponse::error(400, "tag already in use").with_hint(FailureClass::Conflict);
        assert_eq!(classify(&response), FailureClass::Conflict);

        let response = ApiResponse::error(500, "schema").with_hint(FailureClass::Permanent);
        assert_eq!(classify(&response), FailureClass::Permanent);
    }

    #[test]
    fn external_identity_is_read_from_body() {
        let response = ApiResponse::ok(
            200,
            Some(serde_json::json!({"Id": 12345, "Label": "1A4060300001234000012345"})),
        );
        assert_eq!(response.external_id(), Some(12345));
        assert_eq!(response.external_label().as_deref(), Some("1A4060300001234000012345"));
        assert_eq!(ApiResponse::ok(204, None).external_id(), None);
    }

    #[test]
    fn failure_message_falls_back_to_status() {
        assert_eq!(ApiResponse::error(502, "").failure_message(), "regulator returned HTTP 502");
        assert_eq!(ApiResponse::error(400, "bad").failure_message(), "bad");
    }

    #[test]
    fn error_codes() {
        assert_eq!(RegulatorError::Transport("reset".into()).code(), "TRANSPORT");
        assert_eq!(RegulatorError::Unexpected("panic".into()).code(), "EXCEPTION");
    }
}

//! Webhook payload envelope.
//!
//! Wire format (JSON):
//!
//! ```json
//! {
//!   "event": "push",
//!   "timestamp": 1700000000000,
//!   "delivery_id": "d-1",
//!   "data": { "ref": "refs/heads/main" },
//!   "nonce": "optional-single-use-token",
//!   "version": "optional-schema-version"
//! }
//! ```
//!
//! Unknown fields are ignored for forward compatibility. Validation errors
//! carry the parser's message, which never reproduces the body itself.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// The parsed payload envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Event type, e.g. `push` or `pull_request`
    pub event: String,

    /// Sender-side event timestamp in epoch milliseconds
    pub timestamp: i64,

    /// Unique delivery id; replays of the same id are rejected
    pub delivery_id: String,

    /// Event data; must be a JSON object
    pub data: Map<String, Value>,

    /// Optional single-use replay token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Optional payload schema version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is not a valid envelope: {0}")]
    Json(String),

    #[error("payload field `{field}` {problem}")]
    Field {
        field: &'static str,
        problem: &'static str,
    },
}

impl WebhookPayload {
    /// Build an outbound payload for `event` with a fresh delivery id and the
    /// current timestamp.
    pub fn new(event: &str, data: Map<String, Value>) -> Self {
        Self {
            event: event.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            delivery_id: Uuid::new_v4().to_string(),
            data,
            nonce: None,
            version: None,
        }
    }

    /// Attach a single-use nonce.
    pub fn with_nonce(mut self, nonce: &str) -> Self {
        self.nonce = Some(nonce.to_string());
        self
    }

    /// Attach a schema version.
    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    fn validate(&self) -> Result<(), PayloadError> {
        if self.event.trim().is_empty() {
            return Err(PayloadError::Field {
                field: "event",
                problem: "must not be empty",
            });
        }
        if self.delivery_id.trim().is_empty() {
            return Err(PayloadError::Field {
                field: "delivery_id",
                problem: "must not be empty",
            });
        }
        if self.timestamp <= 0 {
            return Err(PayloadError::Field {
                field: "timestamp",
                problem: "must be a positive epoch-millisecond value",
            });
        }
        Ok(())
    }
}

/// Parse and validate a raw body as the payload envelope.
pub fn parse(raw_body: &[u8]) -> Result<WebhookPayload, PayloadError> {
    let payload: WebhookPayload =
        serde_json::from_slice(raw_body).map_err(|e| PayloadError::Json(e.to_string()))?;
    payload.validate()?;
    Ok(payload)
}

//! ==============================================================================
//! store.rs - remote record store client
//! ==============================================================================
//!
//! purpose:
//!     ships one TransmissionRecord per call to the remote append-only
//!     store: a single-row POST against the store's REST surface with a
//!     static credential. a record is either fully accepted or not recorded
//!     at all; there is no batching and no retry here (the loop retries
//!     naturally on its next cycle).
//!
//! relationships:
//!     - used by: transmitter.rs (send sub-cycle)
//!     - RecordSink is the seam; tests substitute scripted sinks
//!
//! the insert is NOT idempotent: a record whose acknowledgment is lost may
//! be accepted remotely and inserted again by the next cycle.
//!
//! ==============================================================================

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::config::StoreConfig;
use crate::domain::TransmissionRecord;

/// per-send, non-fatal failure; the message is surfaced verbatim in the
/// loop snapshot
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransmissionError {
    pub message: String,
}

impl TransmissionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub trait RecordSink: Send + Sync + 'static {
    fn insert(
        &self,
        record: TransmissionRecord,
    ) -> impl Future<Output = Result<(), TransmissionError>> + Send;
}

pub struct TelemetryStore {
    client: reqwest::Client,
    insert_url: String,
    api_key: String,
}

impl TelemetryStore {
    pub fn new(config: &StoreConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let insert_url = format!(
            "{}/rest/v1/{}",
            config.base_url.trim_end_matches('/'),
            config.table
        );

        Ok(Self {
            client,
            insert_url,
            api_key: config.api_key.clone(),
        })
    }
}

impl RecordSink for TelemetryStore {
    async fn insert(&self, record: TransmissionRecord) -> Result<(), TransmissionError> {
        tracing::debug!("inserting record for {}", record.device_id);

        let response = self
            .client
            .post(&self.insert_url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=minimal")
            .json(&record)
            .send()
            .await
            .map_err(|e| TransmissionError::new(format!("Connection failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(remote_error(status, &body))
    }
}

/// map the store's structured error body to a display message; falls back
/// to the bare http status when the body is not the expected shape
fn remote_error(status: StatusCode, body: &str) -> TransmissionError {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
        code: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.message {
            return match parsed.code {
                Some(code) => {
                    TransmissionError::new(format!("Database error: {} ({})", message, code))
                }
                None => TransmissionError::new(format!("Database error: {}", message)),
            };
        }
    }

    TransmissionError::new(format!("Database error: http {}", status.as_u16()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_error_body_keeps_message_and_code() {
        let err = remote_error(
            StatusCode::CONFLICT,
            r#"{"message":"duplicate key","code":"23505"}"#,
        );
        assert_eq!(err.message, "Database error: duplicate key (23505)");
        assert_eq!(err.to_string(), "Database error: duplicate key (23505)");
    }

    #[test]
    fn message_without_code_is_still_usable() {
        let err = remote_error(
            StatusCode::BAD_REQUEST,
            r#"{"message":"invalid input syntax"}"#,
        );
        assert_eq!(err.message, "Database error: invalid input syntax");
    }

    #[test]
    fn unparseable_body_falls_back_to_status() {
        let err = remote_error(StatusCode::BAD_GATEWAY, "<html>upstream down</html>");
        assert_eq!(err.message, "Database error: http 502");

        let err = remote_error(StatusCode::UNAUTHORIZED, "");
        assert_eq!(err.message, "Database error: http 401");
    }
}

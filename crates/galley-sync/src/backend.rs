//! # Sync Backend
//!
//! The authoritative backend as seen by the client: a reachability
//! handshake, a batch push of outbox entries, and the active orders a kitchen
//! display rebuilds from after a fresh connection.
//!
//! ```text
//! SyncOrchestrator ──┐
//! runtime (refresh) ─┴► SyncBackend (trait)
//!                         ├── HttpBackend   GET  /api/health
//!                         │                 POST /api/sync/batch
//!                         │                 GET  /api/orders/active
//!                         └── test fakes
//! ```
//!
//! The backend deduplicates by entry id, so replaying an entry that was
//! already accepted is harmless.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};
use galley_core::{Order, OutboxCategory, OutboxOperation, SyncOutboxEntry};

// =============================================================================
// Wire Types
// =============================================================================

/// Result of pushing one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOutcome {
    /// Entries the backend accepted.
    #[serde(default)]
    pub acked_ids: Vec<String>,

    /// Entries the backend rejected.
    #[serde(default)]
    pub failed: Vec<FailedEntry>,
}

/// A rejected entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub id: String,
    pub error: String,
    #[serde(default)]
    pub retryable: bool,
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    device_id: &'a str,
    entries: Vec<BatchEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct BatchEntry<'a> {
    id: &'a str,
    category: OutboxCategory,
    entity_id: &'a str,
    operation: OutboxOperation,
    payload: serde_json::Value,
}

impl<'a> BatchEntry<'a> {
    fn from_entry(entry: &'a SyncOutboxEntry) -> Self {
        // Payloads are queued as JSON text; anything else goes up verbatim.
        let payload = serde_json::from_str(&entry.payload)
            .unwrap_or_else(|_| serde_json::Value::String(entry.payload.clone()));
        BatchEntry {
            id: &entry.id,
            category: entry.category,
            entity_id: &entry.entity_id,
            operation: entry.operation,
            payload,
        }
    }
}

// =============================================================================
// Backend Trait
// =============================================================================

/// Operations the client needs from the backend.
#[async_trait]
pub trait SyncBackend: Send + Sync {
    /// Confirms the backend is reachable and accepts this device.
    async fn handshake(&self) -> SyncResult<()>;

    /// Pushes a batch of outbox entries.
    async fn push(&self, entries: &[SyncOutboxEntry]) -> SyncResult<PushOutcome>;

    /// Latest revision of every order that is neither delivered nor
    /// cancelled.
    async fn fetch_active_orders(&self) -> SyncResult<Vec<Order>>;
}

// =============================================================================
// HTTP Backend
// =============================================================================

/// [`SyncBackend`] over the backend's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
    device_id: String,
    token: String,
}

impl HttpBackend {
    /// Creates a backend client for `base_url`. `token` is the decrypted
    /// device token.
    pub fn new(
        base_url: &str,
        device_id: impl Into<String>,
        token: impl Into<String>,
        request_timeout: Duration,
    ) -> SyncResult<Self> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::Internal(format!("HTTP client: {}", e)))?;

        Ok(HttpBackend {
            client,
            base,
            device_id: device_id.into(),
            token: token.into(),
        })
    }

    fn endpoint(&self, path: &str) -> SyncResult<Url> {
        Ok(self.base.join(path)?)
    }

    async fn check_status(response: reqwest::Response) -> SyncResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP {} from {}: {}", status.as_u16(), url, body.trim());

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SyncError::AuthRejected(message)),
            _ => Err(SyncError::Backend {
                message,
                retryable: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
            }),
        }
    }
}

#[async_trait]
impl SyncBackend for HttpBackend {
    async fn handshake(&self) -> SyncResult<()> {
        let url = self.endpoint("api/health")?;
        debug!(%url, "Backend handshake");

        let response = self
            .client
            .get(url)
            .header("X-Device-Token", &self.token)
            .header("X-Device-Id", &self.device_id)
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }

    async fn push(&self, entries: &[SyncOutboxEntry]) -> SyncResult<PushOutcome> {
        if entries.is_empty() {
            return Ok(PushOutcome::default());
        }

        let url = self.endpoint("api/sync/batch")?;
        let request = BatchRequest {
            device_id: &self.device_id,
            entries: entries.iter().map(BatchEntry::from_entry).collect(),
        };

        let response = self
            .client
            .post(url)
            .header("X-Device-Token", &self.token)
            .header("X-Device-Id", &self.device_id)
            .json(&request)
            .send()
            .await?;

        let outcome: PushOutcome = Self::check_status(response).await?.json().await?;
        if !outcome.failed.is_empty() {
            warn!(
                acked = outcome.acked_ids.len(),
                failed = outcome.failed.len(),
                "Backend rejected part of the batch"
            );
        }
        Ok(outcome)
    }

    async fn fetch_active_orders(&self) -> SyncResult<Vec<Order>> {
        let url = self.endpoint("api/orders/active")?;

        let response = self
            .client
            .get(url)
            .header("X-Device-Token", &self.token)
            .header("X-Device-Id", &self.device_id)
            .send()
            .await?;

        let orders: Vec<Order> = Self::check_status(response).await?.json().await?;
        debug!(count = orders.len(), "Fetched active orders");
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(payload: &str) -> SyncOutboxEntry {
        SyncOutboxEntry {
            id: "e1".into(),
            category: OutboxCategory::Orders,
            entity_id: "ord-1".into(),
            operation: OutboxOperation::Create,
            payload: payload.into(),
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            attempted_at: None,
            synced_at: None,
        }
    }

    #[test]
    fn test_batch_request_shape() {
        let entries = [entry(r#"{"id":"ord-1","total_cents":800}"#)];
        let request = BatchRequest {
            device_id: "pos-1",
            entries: entries.iter().map(BatchEntry::from_entry).collect(),
        };
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["device_id"], "pos-1");
        assert_eq!(json["entries"][0]["category"], "orders");
        assert_eq!(json["entries"][0]["operation"], "create");
        assert_eq!(json["entries"][0]["payload"]["total_cents"], 800);
    }

    #[test]
    fn test_non_json_payload_sent_as_string() {
        let entries = [entry("not json")];
        let batch = BatchEntry::from_entry(&entries[0]);
        assert_eq!(batch.payload, serde_json::Value::String("not json".into()));
    }

    #[test]
    fn test_push_outcome_defaults() {
        let outcome: PushOutcome =
            serde_json::from_str(r#"{"failed":[{"id":"e2","error":"bad total"}]}"#).unwrap();
        assert!(outcome.acked_ids.is_empty());
        assert!(!outcome.failed[0].retryable);
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let backend =
            HttpBackend::new("https://orders.example.com/tenant-1", "pos-1", "tok", Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            backend.endpoint("api/health").unwrap().as_str(),
            "https://orders.example.com/tenant-1/api/health"
        );
    }
}

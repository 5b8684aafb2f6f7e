//! # Sync Status
//!
//! The orchestrator's user-visible state, and its on-disk snapshot.
//!
//! ## State Machine
//! ```text
//!            force_sync / interval / BecameOnline
//!   ┌──────┐ ─────────────────────────────────► ┌─────────┐
//!   │ idle │                                    │ syncing │
//!   └──────┘ ◄──┐                               └────┬────┘
//!               │                        ok          │        error / offline
//!               │                    ┌───────────────┴────────────────┐
//!               │                    ▼                                ▼
//!               │             ┌───────────┐                     ┌────────┐
//!               └──────────── │ completed │                     │ failed │
//!               └──────────── └───────────┘                     └────────┘
//! ```
//!
//! ## Snapshot Format
//! ```json
//! {
//!   "status": "completed",
//!   "lastSyncAt": "2024-05-01T12:00:00Z",
//!   "pendingOrders": 0,
//!   "pendingSales": 0,
//!   "pendingInvoices": 0,
//!   "error": null
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use galley_core::PendingCounts;

/// File name of the status snapshot inside the data directory.
pub const SNAPSHOT_FILE_NAME: &str = "sync_status.json";

/// Error recorded when a run was cut short by a restart.
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

// =============================================================================
// Sync State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    Completed,
    Failed,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::Syncing => write!(f, "syncing"),
            SyncState::Completed => write!(f, "completed"),
            SyncState::Failed => write!(f, "failed"),
        }
    }
}

// =============================================================================
// Sync Status
// =============================================================================

/// Snapshot of the orchestrator's state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub status: SyncState,

    /// When the last successful run finished.
    pub last_sync_at: Option<DateTime<Utc>>,

    pub pending_orders: i64,
    pub pending_sales: i64,
    pub pending_invoices: i64,

    /// Error from the last failed run, cleared when a new run starts.
    pub error: Option<String>,
}

impl SyncStatus {
    /// Total number of mutations waiting for the backend.
    pub fn pending_total(&self) -> i64 {
        self.pending_orders + self.pending_sales + self.pending_invoices
    }

    /// Returns true if the last run did not fail.
    pub fn is_healthy(&self) -> bool {
        self.status != SyncState::Failed && self.error.is_none()
    }

    pub fn counts(&self) -> PendingCounts {
        PendingCounts {
            orders: self.pending_orders,
            sales: self.pending_sales,
            invoices: self.pending_invoices,
        }
    }

    pub fn set_counts(&mut self, counts: PendingCounts) {
        self.pending_orders = counts.orders;
        self.pending_sales = counts.sales;
        self.pending_invoices = counts.invoices;
    }
}

// =============================================================================
// Snapshot Store
// =============================================================================

/// A snapshot read back at startup.
#[derive(Debug, Clone)]
pub struct RestoredStatus {
    pub status: SyncStatus,

    /// True if the previous process stopped in the middle of a run.
    pub interrupted: bool,
}

/// Reads and writes `sync_status.json`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotStore { path: path.into() }
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(SNAPSHOT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the snapshot. A missing file yields the idle default; a stored
    /// `syncing` comes back as `failed`.
    pub fn load(&self) -> SyncResult<RestoredStatus> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No sync snapshot, starting idle");
                return Ok(RestoredStatus {
                    status: SyncStatus::default(),
                    interrupted: false,
                });
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let mut status: SyncStatus = serde_json::from_str(&contents)
            .map_err(|e| SyncError::SnapshotIo(format!("{}: {}", self.path.display(), e)))?;

        let interrupted = status.status == SyncState::Syncing;
        if interrupted {
            warn!("Previous sync was interrupted by a restart");
            status.status = SyncState::Failed;
            status.error = Some(INTERRUPTED_BY_RESTART.to_string());
        }

        Ok(RestoredStatus { status, interrupted })
    }

    /// Writes the snapshot atomically (temp file + rename).
    pub fn save(&self, status: &SyncStatus) -> SyncResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let json = serde_json::to_vec_pretty(status)?;
        let tmp = self.path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

        fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(self.io_error(e));
        }

        debug!(status = %status.status, "Sync snapshot saved");
        Ok(())
    }

    fn io_error(&self, err: std::io::Error) -> SyncError {
        SyncError::SnapshotIo(format!("{}: {}", self.path.display(), err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_snapshot_is_idle() {
        let dir = tempfile::tempdir().unwrap();
        let restored = SnapshotStore::in_dir(dir.path()).load().unwrap();

        assert_eq!(restored.status, SyncStatus::default());
        assert!(!restored.interrupted);
        assert!(restored.status.is_healthy());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::in_dir(dir.path());

        let status = SyncStatus {
            status: SyncState::Completed,
            last_sync_at: Some(Utc::now()),
            pending_orders: 0,
            pending_sales: 2,
            pending_invoices: 1,
            error: None,
        };
        store.save(&status).unwrap();

        let restored = store.load().unwrap();
        assert_eq!(restored.status, status);
        assert_eq!(restored.status.pending_total(), 3);
        // no temp files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_camel_case_keys() {
        let status = SyncStatus {
            status: SyncState::Failed,
            error: Some("offline".into()),
            ..Default::default()
        };
        let json: serde_json::Value = serde_json::to_value(&status).unwrap();

        assert_eq!(json["status"], "failed");
        assert_eq!(json["pendingOrders"], 0);
        assert!(json.get("lastSyncAt").is_some());
        assert!(json.get("pendingInvoices").is_some());
        assert_eq!(json["error"], "offline");
    }

    #[test]
    fn test_syncing_restores_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(SNAPSHOT_FILE_NAME),
            r#"{"status":"syncing","lastSyncAt":null,"pendingOrders":4,
                "pendingSales":0,"pendingInvoices":0,"error":null}"#,
        )
        .unwrap();

        let restored = SnapshotStore::in_dir(dir.path()).load().unwrap();
        assert!(restored.interrupted);
        assert_eq!(restored.status.status, SyncState::Failed);
        assert_eq!(restored.status.error.as_deref(), Some(INTERRUPTED_BY_RESTART));
        assert_eq!(restored.status.pending_orders, 4);
        assert!(!restored.status.is_healthy());
    }

    #[test]
    fn test_corrupt_snapshot_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SNAPSHOT_FILE_NAME), "{not json").unwrap();

        let err = SnapshotStore::in_dir(dir.path()).load().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }
}

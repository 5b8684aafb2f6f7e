//! Sync orchestrator against an in-memory outbox and a scripted backend.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio::time::timeout;

use galley_core::{Order, OutboxCategory, OutboxOperation, SyncOutboxEntry};
use galley_db::{Database, DbConfig};
use galley_sync::{
    ConnectivityMonitor, FailedEntry, NoOpNotifier, OrchestratorConfig, PushOutcome, SnapshotStore,
    SyncBackend, SyncError, SyncOrchestrator, SyncOrchestratorHandle, SyncResult, SyncState,
    SyncStatus,
};

// =============================================================================
// Scripted Backend
// =============================================================================

#[derive(Default)]
struct FakeBackend {
    handshakes: AtomicUsize,
    pushes: AtomicUsize,
    /// Entities the backend refuses.
    rejected: HashSet<String>,
    /// When set, pushes signal `entered` and wait for `release`.
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
    handshake_delay: Option<Duration>,
}

impl FakeBackend {
    fn gated() -> (Self, Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let backend = FakeBackend {
            gate: Some((entered.clone(), release.clone())),
            ..Default::default()
        };
        (backend, entered, release)
    }

    fn pushes(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncBackend for FakeBackend {
    async fn handshake(&self) -> SyncResult<()> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.handshake_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn push(&self, entries: &[SyncOutboxEntry]) -> SyncResult<PushOutcome> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }

        let mut outcome = PushOutcome::default();
        for entry in entries {
            if self.rejected.contains(&entry.entity_id) {
                outcome.failed.push(FailedEntry {
                    id: entry.id.clone(),
                    error: "total mismatch".into(),
                    retryable: false,
                });
            } else {
                outcome.acked_ids.push(entry.id.clone());
            }
        }
        Ok(outcome)
    }

    async fn fetch_active_orders(&self) -> SyncResult<Vec<Order>> {
        Ok(Vec::new())
    }
}

// =============================================================================
// Helpers
// =============================================================================

struct Fixture {
    _dir: TempDir,
    db: Database,
    snapshots: SnapshotStore,
    connectivity: ConnectivityMonitor,
}

async fn fixture(online: bool) -> Fixture {
    let dir = TempDir::new().unwrap();
    let snapshots = SnapshotStore::in_dir(dir.path());
    Fixture {
        db: Database::new(DbConfig::in_memory()).await.unwrap(),
        snapshots,
        connectivity: ConnectivityMonitor::new(online),
        _dir: dir,
    }
}

async fn queue_orders(db: &Database, ids: &[&str]) {
    for id in ids {
        db.outbox()
            .queue(OutboxCategory::Orders, id, OutboxOperation::Create, r#"{"id":"x"}"#)
            .await
            .unwrap();
    }
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        // Periodic runs stay out of the way of these tests.
        interval: Duration::from_secs(3600),
        batch_size: 50,
        handshake_timeout: Duration::from_secs(5),
    }
}

fn spawn(fx: &Fixture, config: OrchestratorConfig, backend: Arc<FakeBackend>) -> SyncOrchestratorHandle {
    SyncOrchestrator::spawn(
        config,
        fx.db.outbox(),
        backend,
        fx.connectivity.clone(),
        fx.snapshots.clone(),
        Arc::new(NoOpNotifier),
    )
}

async fn wait_for_state(handle: &SyncOrchestratorHandle, state: SyncState) -> SyncStatus {
    let mut rx = handle.subscribe();
    let status = timeout(Duration::from_secs(5), rx.wait_for(|s| s.status == state))
        .await
        .expect("status change timed out")
        .unwrap()
        .clone();
    status
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_offline_then_online_syncs_automatically() {
    let fx = fixture(false).await;
    queue_orders(&fx.db, &["ord-1", "ord-2"]).await;

    let backend = Arc::new(FakeBackend::default());
    let handle = spawn(&fx, config(), backend.clone());

    let status = handle.refresh_pending().await.unwrap();
    assert_eq!(status.pending_orders, 2);

    // Offline: fast failure, counts untouched, no network.
    let result = handle.force_sync().await;
    assert!(matches!(result, Err(SyncError::Offline)));
    let status = handle.status();
    assert_eq!(status.status, SyncState::Failed);
    assert_eq!(status.pending_orders, 2);
    assert_eq!(backend.handshakes(), 0);
    assert_eq!(backend.pushes(), 0);

    fx.connectivity.set_online(true);
    let status = wait_for_state(&handle, SyncState::Completed).await;

    assert_eq!(status.pending_orders, 0);
    assert!(status.error.is_none());
    let synced_at = status.last_sync_at.expect("last_sync_at set");
    assert!((Utc::now() - synced_at).num_seconds().abs() < 5);

    let restored = fx.snapshots.load().unwrap();
    assert_eq!(restored.status.status, SyncState::Completed);
    assert_eq!(restored.status.pending_orders, 0);
    assert!(!restored.interrupted);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_requests_coalesce() {
    let fx = fixture(true).await;
    queue_orders(&fx.db, &["ord-1"]).await;

    let (backend, entered, release) = FakeBackend::gated();
    let backend = Arc::new(backend);
    let handle = spawn(&fx, config(), backend.clone());

    let first = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.force_sync().await })
    };
    entered.notified().await;

    // A second request while syncing returns the current status.
    let second = handle.force_sync().await.unwrap();
    assert_eq!(second.status, SyncState::Syncing);

    release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status, SyncState::Completed);
    assert_eq!(backend.pushes(), 1);
    assert_eq!(backend.handshakes(), 1);
}

#[tokio::test]
async fn test_going_offline_mid_sync_keeps_previous_counts() {
    let fx = fixture(true).await;
    queue_orders(&fx.db, &["ord-1"]).await;

    let (backend, entered, _release) = FakeBackend::gated();
    let handle = spawn(&fx, config(), Arc::new(backend));
    handle.refresh_pending().await.unwrap();

    let run = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.force_sync().await })
    };
    entered.notified().await;
    fx.connectivity.set_online(false);

    let result = run.await.unwrap();
    assert!(matches!(result, Err(SyncError::Offline)));

    let status = handle.status();
    assert_eq!(status.status, SyncState::Failed);
    assert_eq!(status.pending_orders, 1);
    assert!(status.last_sync_at.is_none());
}

#[tokio::test]
async fn test_rejected_entries_stay_pending() {
    let fx = fixture(true).await;
    queue_orders(&fx.db, &["ord-ok", "ord-bad"]).await;

    let backend = FakeBackend {
        rejected: HashSet::from(["ord-bad".to_string()]),
        ..Default::default()
    };
    let handle = spawn(&fx, config(), Arc::new(backend));

    let status = handle.force_sync().await.unwrap();
    assert_eq!(status.status, SyncState::Completed);
    assert_eq!(status.pending_orders, 1);

    let pending = fx.db.outbox().get_pending(10, 10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].entity_id, "ord-bad");
    assert_eq!(pending[0].attempts, 1);
    assert_eq!(pending[0].last_error.as_deref(), Some("total mismatch"));
}

#[tokio::test]
async fn test_replay_walks_every_batch() {
    let fx = fixture(true).await;
    queue_orders(&fx.db, &["o1", "o2", "o3", "o4", "o5"]).await;

    let backend = Arc::new(FakeBackend::default());
    let handle = spawn(
        &fx,
        OrchestratorConfig {
            batch_size: 2,
            ..config()
        },
        backend.clone(),
    );

    let status = handle.force_sync().await.unwrap();
    assert_eq!(status.pending_orders, 0);
    assert_eq!(backend.pushes(), 3);
}

#[tokio::test]
async fn test_handshake_timeout_fails_run() {
    let fx = fixture(true).await;
    queue_orders(&fx.db, &["ord-1"]).await;

    let backend = Arc::new(FakeBackend {
        handshake_delay: Some(Duration::from_secs(10)),
        ..Default::default()
    });
    let handle = spawn(
        &fx,
        OrchestratorConfig {
            handshake_timeout: Duration::from_millis(50),
            ..config()
        },
        backend.clone(),
    );
    handle.refresh_pending().await.unwrap();

    let result = handle.force_sync().await;
    assert!(matches!(result, Err(SyncError::Timeout { .. })));

    let status = handle.status();
    assert_eq!(status.status, SyncState::Failed);
    assert!(status.error.unwrap().contains("handshake"));
    assert_eq!(status.pending_orders, 1);
    assert_eq!(backend.pushes(), 0);
}

#[tokio::test]
async fn test_interrupted_run_resyncs_on_start() {
    let fx = fixture(true).await;
    queue_orders(&fx.db, &["ord-1"]).await;

    let stale = SyncStatus {
        status: SyncState::Syncing,
        pending_orders: 1,
        ..Default::default()
    };
    fx.snapshots.save(&stale).unwrap();

    let backend = Arc::new(FakeBackend::default());
    let handle = spawn(&fx, config(), backend.clone());

    let status = wait_for_state(&handle, SyncState::Completed).await;
    assert_eq!(status.pending_orders, 0);
    assert_eq!(backend.handshakes(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn test_interrupted_state_persisted_while_offline() {
    let fx = fixture(false).await;
    let stale = SyncStatus {
        status: SyncState::Syncing,
        pending_orders: 3,
        ..Default::default()
    };
    fx.snapshots.save(&stale).unwrap();

    let backend = Arc::new(FakeBackend::default());
    let handle = spawn(&fx, config(), backend.clone());
    assert_eq!(handle.status().status, SyncState::Failed);

    let on_disk = timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(restored) = fx.snapshots.load() {
                if !restored.interrupted {
                    return restored.status;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("snapshot was not rewritten");

    assert_eq!(on_disk.status, SyncState::Failed);
    assert_eq!(on_disk.pending_orders, 3);
    assert_eq!(backend.handshakes(), 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_snapshot_starts_idle() {
    let fx = fixture(false).await;
    std::fs::write(fx.snapshots.path(), "{ not json").unwrap();

    let handle = spawn(&fx, config(), Arc::new(FakeBackend::default()));

    let status = handle.status();
    assert_eq!(status.status, SyncState::Idle);
    assert_eq!(status.pending_total(), 0);
}

//! # Sync Orchestrator
//!
//! Replays the local outbox to the backend and owns the user-visible
//! [`SyncStatus`].
//!
//! ## Sync Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Orchestrator                                │
//! │                                                                         │
//! │  TRIGGERS                                                              │
//! │  ────────                                                              │
//! │  • every `interval` while online                                       │
//! │  • ConnectivityEvent::BecameOnline                                     │
//! │  • force_sync()                                                        │
//! │  • on start, if the previous run was interrupted                       │
//! │                                                                         │
//! │  ONE RUN (at most one in flight, extra requests coalesce)              │
//! │  ───────                                                               │
//! │  offline? ──yes──► failed(Offline), warning toast, no network          │
//! │     │no                                                                 │
//! │     ▼                                                                   │
//! │  syncing (error cleared)                                               │
//! │     │                                                                   │
//! │     ├── handshake (handshake_timeout)                                  │
//! │     ├── loop: get_pending(batch) ─► push ─► mark_synced / mark_failed  │
//! │     └── pending_counts()                                               │
//! │     │                                                                   │
//! │     ├── ok ──────────────► completed, last_sync_at = now, new counts   │
//! │     ├── error ───────────► failed(error), counts unchanged             │
//! │     └── went offline ────► failed(Offline), counts unchanged           │
//! │                                                                         │
//! │  Every transition is published on a watch channel and written to       │
//! │  sync_status.json.                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::backend::SyncBackend;
use crate::config::ClientConfig;
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::events::{Severity, StatusNotifier};
use crate::status::{SnapshotStore, SyncState, SyncStatus};
use galley_core::PendingCounts;
use galley_db::OutboxRepository;

// =============================================================================
// Constants
// =============================================================================

/// Entries that failed this many times are no longer pushed.
pub const MAX_RETRY_ATTEMPTS: i64 = 10;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Interval between periodic runs while online.
    pub interval: Duration,

    /// Entries pushed per request.
    pub batch_size: u32,

    /// Upper bound on the reachability handshake.
    pub handshake_timeout: Duration,
}

impl OrchestratorConfig {
    pub fn from_client(config: &ClientConfig) -> Self {
        OrchestratorConfig {
            interval: config.sync_interval(),
            batch_size: config.sync.batch_size,
            handshake_timeout: config.handshake_timeout(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            interval: Duration::from_secs(30),
            batch_size: 50,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

struct Shared {
    config: OrchestratorConfig,
    outbox: OutboxRepository,
    backend: Arc<dyn SyncBackend>,
    connectivity: ConnectivityMonitor,
    notifier: Arc<dyn StatusNotifier>,
    snapshots: SnapshotStore,
    status_tx: watch::Sender<SyncStatus>,

    /// Held for the duration of a run.
    run_lock: Mutex<()>,

    /// Serializes status updates with their snapshot writes.
    persist_lock: Mutex<()>,
}

impl Shared {
    fn current(&self) -> SyncStatus {
        self.status_tx.borrow().clone()
    }

    /// Applies `change`, publishes the result and writes the snapshot on the
    /// blocking pool.
    async fn update(&self, change: impl FnOnce(&mut SyncStatus)) -> SyncStatus {
        let _persist = self.persist_lock.lock().await;

        self.status_tx.send_modify(change);
        let status = self.current();

        let snapshots = self.snapshots.clone();
        let snapshot = status.clone();
        match task::spawn_blocking(move || snapshots.save(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to write sync snapshot"),
            Err(e) => warn!(error = %e, "Sync snapshot writer failed"),
        }
        status
    }

    async fn sync(&self) -> SyncResult<SyncStatus> {
        let Ok(_running) = self.run_lock.try_lock() else {
            debug!("Sync already in progress, coalescing request");
            return Ok(self.current());
        };

        if !self.connectivity.is_online() {
            info!("Offline, sync deferred until connectivity returns");
            self.fail(&SyncError::Offline).await;
            return Err(SyncError::Offline);
        }

        self.update(|s| {
            s.status = SyncState::Syncing;
            s.error = None;
        })
        .await;

        let outcome = tokio::select! {
            result = self.replay() => result,
            _ = until_offline(self.connectivity.watch()) => {
                info!("Went offline mid-sync, abandoning run");
                Err(SyncError::Offline)
            }
        };

        match outcome {
            Ok(counts) => {
                let status = self
                    .update(|s| {
                        s.status = SyncState::Completed;
                        s.last_sync_at = Some(Utc::now());
                        s.set_counts(counts);
                    })
                    .await;
                info!(pending = status.pending_total(), "Sync completed");
                Ok(status)
            }
            Err(e) => {
                self.fail(&e).await;
                Err(e)
            }
        }
    }

    /// Records a failed run. Counters are left as they were.
    async fn fail(&self, error: &SyncError) {
        let message = error.to_string();
        self.update(|s| {
            s.status = SyncState::Failed;
            s.error = Some(message);
        })
        .await;

        if error.kind() == ErrorKind::Offline {
            self.notifier
                .notify("Offline: changes will sync when the connection returns", Severity::Warning);
        } else {
            warn!(error = %error, "Sync failed");
            self.notifier
                .notify(&format!("Sync failed: {}", error), Severity::Warning);
        }
    }

    /// Pushes pending outbox entries and returns the recounted totals.
    async fn replay(&self) -> SyncResult<PendingCounts> {
        match timeout(self.config.handshake_timeout, self.backend.handshake()).await {
            Ok(result) => result?,
            Err(_) => return Err(SyncError::timeout("handshake", self.config.handshake_timeout)),
        }

        let batch_size = self.config.batch_size as usize;
        // Entries already tried in this run and still pending.
        let mut skipped: HashSet<String> = HashSet::new();
        let mut acked = 0u64;
        let mut failed = 0usize;

        loop {
            let limit = self.config.batch_size + skipped.len() as u32;
            let batch: Vec<_> = self
                .outbox
                .get_pending(limit, MAX_RETRY_ATTEMPTS)
                .await?
                .into_iter()
                .filter(|entry| !skipped.contains(&entry.id))
                .take(batch_size)
                .collect();

            if batch.is_empty() {
                break;
            }

            debug!(count = batch.len(), "Pushing outbox batch");
            let outcome = self.backend.push(&batch).await?;

            acked += self.outbox.mark_synced(&outcome.acked_ids).await?;
            for rejected in &outcome.failed {
                warn!(
                    entry_id = %rejected.id,
                    error = %rejected.error,
                    retryable = rejected.retryable,
                    "Outbox entry rejected"
                );
                self.outbox.mark_failed(&rejected.id, &rejected.error).await?;
                failed += 1;
            }

            let acked_ids: HashSet<&str> = outcome.acked_ids.iter().map(String::as_str).collect();
            for entry in &batch {
                if !acked_ids.contains(entry.id.as_str()) {
                    skipped.insert(entry.id.clone());
                }
            }

            if batch.len() < batch_size {
                break;
            }
        }

        info!(acked, failed, "Outbox replay finished");
        Ok(self.outbox.pending_counts().await?)
    }

    async fn refresh_pending(&self) -> SyncResult<SyncStatus> {
        let counts = self.outbox.pending_counts().await?;
        Ok(self.update(|s| s.set_counts(counts)).await)
    }
}

/// Resolves once connectivity is lost.
async fn until_offline(mut online: watch::Receiver<bool>) {
    if online.wait_for(|is_online| !*is_online).await.is_err() {
        std::future::pending::<()>().await;
    }
}

// =============================================================================
// Orchestrator Handle
// =============================================================================

/// Handle for reading status and requesting runs.
#[derive(Clone)]
pub struct SyncOrchestratorHandle {
    shared: Arc<Shared>,
    shutdown_tx: mpsc::Sender<()>,
}

impl SyncOrchestratorHandle {
    /// Returns the current status without waiting.
    pub fn status(&self) -> SyncStatus {
        self.shared.current()
    }

    /// Subscribes to status changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Runs a sync now. If one is already running, returns the current
    /// status without starting another.
    pub async fn force_sync(&self) -> SyncResult<SyncStatus> {
        self.shared.sync().await
    }

    /// Recounts pending outbox entries without syncing.
    pub async fn refresh_pending(&self) -> SyncResult<SyncStatus> {
        self.shared.refresh_pending().await
    }

    /// Stops periodic and event-triggered runs.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Sync orchestrator already stopped".into()))
    }
}

// =============================================================================
// Sync Orchestrator
// =============================================================================

/// The background loop that triggers runs.
pub struct SyncOrchestrator {
    shared: Arc<Shared>,
    events: tokio::sync::broadcast::Receiver<ConnectivityEvent>,
    shutdown_rx: mpsc::Receiver<()>,
    resync_on_start: bool,
}

impl SyncOrchestrator {
    /// Restores the last snapshot and spawns the orchestrator loop.
    pub fn spawn(
        config: OrchestratorConfig,
        outbox: OutboxRepository,
        backend: Arc<dyn SyncBackend>,
        connectivity: ConnectivityMonitor,
        snapshots: SnapshotStore,
        notifier: Arc<dyn StatusNotifier>,
    ) -> SyncOrchestratorHandle {
        let (initial, interrupted) = match snapshots.load() {
            Ok(restored) => (restored.status, restored.interrupted),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable sync snapshot");
                (SyncStatus::default(), false)
            }
        };

        let (status_tx, _) = watch::channel(initial);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let events = connectivity.subscribe();

        let shared = Arc::new(Shared {
            config,
            outbox,
            backend,
            connectivity,
            notifier,
            snapshots,
            status_tx,
            run_lock: Mutex::new(()),
            persist_lock: Mutex::new(()),
        });

        let orchestrator = SyncOrchestrator {
            shared: shared.clone(),
            events,
            shutdown_rx,
            resync_on_start: interrupted,
        };
        tokio::spawn(orchestrator.run());

        SyncOrchestratorHandle {
            shared,
            shutdown_tx,
        }
    }

    async fn run(mut self) {
        info!(interval = ?self.shared.config.interval, "Sync orchestrator starting");

        if self.resync_on_start {
            // Persist the recovered state before anything else.
            self.shared.update(|_| {}).await;
            if self.shared.connectivity.is_online() {
                info!("Re-running sync interrupted by restart");
                let _ = self.shared.sync().await;
            }
        }

        let mut ticker = interval(self.shared.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.shared.connectivity.is_online() {
                        let _ = self.shared.sync().await;
                    } else {
                        debug!("Offline, skipping periodic sync");
                    }
                }

                event = self.events.recv() => match event {
                    Ok(ConnectivityEvent::BecameOnline) => {
                        info!("Connectivity restored, syncing");
                        let _ = self.shared.sync().await;
                    }
                    Ok(ConnectivityEvent::BecameOffline) => {
                        debug!("Connectivity lost");
                    }
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "Missed connectivity events");
                        if self.shared.connectivity.is_online() {
                            let _ = self.shared.sync().await;
                        }
                    }
                    Err(RecvError::Closed) => break,
                },

                _ = self.shutdown_rx.recv() => {
                    info!("Sync orchestrator shutting down");
                    break;
                }
            }
        }

        info!("Sync orchestrator stopped");
    }
}

//! # Client Runtime
//!
//! Wires one POS or kitchen client together.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          ClientRuntime                                  │
//! │                                                                         │
//! │  SecretStore ──decrypt token──┬──────────────┐                         │
//! │                               ▼              ▼                          │
//! │  ConnectivityMonitor ──► SyncOrchestrator   MessagingChannel            │
//! │     ▲ (TCP probe)            │ (outbox)        │ ChannelEvent            │
//! │     │                        ▼                 ▼                         │
//! │     │                   galley.db ◄──── event pump ───► KitchenBoard    │
//! │     │                  (outbox, order cache)           (kitchen role)   │
//! │                                                                         │
//! │  submit_order(): cache ─► outbox ─► channel ─► refresh_pending          │
//! │  fresh connection: backend active orders ─► cache ─► board reload       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{HttpBackend, SyncBackend};
use crate::channel::{ChannelConfig, ChannelEvent, ChannelHandle, MessagingChannel};
use crate::config::ClientConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::events::{NoOpNotifier, StatusNotifier};
use crate::kitchen::{BoardEvent, KitchenBoard, KitchenBoardHandle};
use crate::orchestrator::{OrchestratorConfig, SyncOrchestrator, SyncOrchestratorHandle};
use crate::protocol::ChannelMessage;
use crate::secret::SecretStore;
use crate::status::{SnapshotStore, SyncStatus};
use galley_core::validation::validate_order;
use galley_core::{Order, OrderStatus, OutboxCategory, OutboxOperation};
use galley_db::{Database, DbConfig, OrderCacheRepository};

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`ClientRuntime`]. Anything not supplied is created from the
/// config.
pub struct ClientRuntimeBuilder {
    config: ClientConfig,
    database: Option<Arc<Database>>,
    secrets: Option<SecretStore>,
    notifier: Arc<dyn StatusNotifier>,
    backend: Option<Arc<dyn SyncBackend>>,
    connectivity: Option<ConnectivityMonitor>,
}

impl ClientRuntimeBuilder {
    pub fn with_database(mut self, database: Arc<Database>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_secret_store(mut self, secrets: SecretStore) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn StatusNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn SyncBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Uses an externally driven monitor. No TCP probe is started.
    pub fn with_connectivity(mut self, connectivity: ConnectivityMonitor) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Validates the config and starts every component.
    pub async fn start(self) -> SyncResult<ClientRuntime> {
        let config = Arc::new(self.config);
        config.validate()?;

        let database = match self.database {
            Some(db) => db,
            None => {
                let data_dir = config.data_dir()?;
                std::fs::create_dir_all(&data_dir).map_err(|e| {
                    SyncError::InvalidConfig(format!("data dir {}: {}", data_dir.display(), e))
                })?;
                Arc::new(Database::new(DbConfig::in_dir(&data_dir)).await?)
            }
        };

        let secrets = match self.secrets {
            Some(secrets) => secrets,
            None => SecretStore::new(config.key_path()?),
        };
        let token = config.device_token(&secrets)?;

        let (connectivity, probe) = match self.connectivity {
            Some(monitor) => (monitor, None),
            None => {
                let monitor = ConnectivityMonitor::new(false);
                let probe = monitor.spawn_probe(
                    config.probe_addr()?,
                    config.probe_interval(),
                    config.channel.connect_timeout(),
                );
                (monitor, Some(probe))
            }
        };

        let backend: Arc<dyn SyncBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(HttpBackend::new(
                &config.backend.http_url,
                config.device_id(),
                token.clone(),
                config.channel.connect_timeout(),
            )?),
        };

        info!(
            device_id = %config.device_id(),
            role = %config.role(),
            ws_url = %config.backend.ws_url,
            "Starting client runtime"
        );

        let sync = SyncOrchestrator::spawn(
            OrchestratorConfig::from_client(&config),
            database.outbox(),
            backend.clone(),
            connectivity.clone(),
            SnapshotStore::new(config.snapshot_path()?),
            self.notifier.clone(),
        );

        let (channel, channel_events) =
            MessagingChannel::spawn(ChannelConfig::from_client(&config, token), self.notifier);

        let (board, board_events) = if config.role().shows_tickets() {
            let (board, events) = KitchenBoard::spawn(config.cancel_countdown());
            board.load(database.orders().list_active().await?).await?;
            (Some(board), Some(events))
        } else {
            (None, None)
        };

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let pump = tokio::spawn(pump_events(
            channel_events,
            database.orders(),
            backend,
            board.clone(),
            shutdown_rx,
        ));

        Ok(ClientRuntime {
            config,
            database,
            connectivity,
            sync,
            channel,
            board,
            board_events,
            probe,
            pump,
            shutdown_tx,
        })
    }
}

// =============================================================================
// Client Runtime
// =============================================================================

/// A running client.
pub struct ClientRuntime {
    config: Arc<ClientConfig>,
    database: Arc<Database>,
    connectivity: ConnectivityMonitor,
    sync: SyncOrchestratorHandle,
    channel: ChannelHandle,
    board: Option<KitchenBoardHandle>,
    board_events: Option<mpsc::Receiver<BoardEvent>>,
    probe: Option<JoinHandle<()>>,
    pump: JoinHandle<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl ClientRuntime {
    pub fn builder(config: ClientConfig) -> ClientRuntimeBuilder {
        ClientRuntimeBuilder {
            config,
            database: None,
            secrets: None,
            notifier: Arc::new(NoOpNotifier),
            backend: None,
            connectivity: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn sync(&self) -> &SyncOrchestratorHandle {
        &self.sync
    }

    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    /// The kitchen board, for clients with the kitchen role.
    pub fn board(&self) -> Option<&KitchenBoardHandle> {
        self.board.as_ref()
    }

    /// Takes the board event stream. Returns `None` after the first call or
    /// for POS clients.
    pub fn take_board_events(&mut self) -> Option<mpsc::Receiver<BoardEvent>> {
        self.board_events.take()
    }

    /// Records a locally entered order revision.
    ///
    /// The revision is cached, queued in the outbox for the orchestrator and
    /// pushed through the channel. Returns the status with refreshed pending
    /// counts.
    pub async fn submit_order(&self, order: &Order, operation: OutboxOperation) -> SyncResult<SyncStatus> {
        validate_order(order).map_err(|e| SyncError::InvalidMessage(e.to_string()))?;

        self.database.orders().upsert(order).await?;

        let payload = serde_json::to_string(order)?;
        self.database
            .outbox()
            .queue(OutboxCategory::Orders, &order.id, operation, &payload)
            .await?;

        let message = match operation {
            OutboxOperation::Create => ChannelMessage::OrderNew(order.clone()),
            _ => ChannelMessage::OrderUpdate(order.clone()),
        };
        if let Err(e) = self.channel.send(message).await {
            // The outbox still carries the revision.
            warn!(order_id = %order.id, error = %e, "Could not queue order on channel");
        }

        debug!(order_id = %order.id, operation = operation.as_str(), "Order submitted");
        self.sync.refresh_pending().await
    }

    /// Stops every component and closes the database.
    pub async fn shutdown(self) -> SyncResult<()> {
        info!("Shutting down client runtime");

        let _ = self.shutdown_tx.send(()).await;
        let _ = self.channel.shutdown().await;
        let _ = self.sync.shutdown().await;
        if let Some(probe) = self.probe {
            probe.abort();
        }
        let _ = self.pump.await;

        self.database.close().await;
        info!("Client runtime stopped");
        Ok(())
    }
}

// =============================================================================
// Event Pump
// =============================================================================

async fn pump_events(
    mut events: mpsc::Receiver<ChannelEvent>,
    orders: OrderCacheRepository,
    backend: Arc<dyn SyncBackend>,
    board: Option<KitchenBoardHandle>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => route_event(event, &orders, backend.as_ref(), board.as_ref()).await,
                None => {
                    info!("Messaging channel stopped");
                    break;
                }
            },

            _ = shutdown_rx.recv() => break,
        }
    }
}

/// Updates the order cache, then hands the event to the board. A fresh
/// connection reloads the board after its reset.
async fn route_event(
    event: ChannelEvent,
    orders: &OrderCacheRepository,
    backend: &dyn SyncBackend,
    board: Option<&KitchenBoardHandle>,
) {
    if let ChannelEvent::Message(envelope) = &event {
        if let Err(e) = cache_revision(&envelope.message, orders).await {
            warn!(error = %e, "Failed to update order cache");
        }
    }

    let Some(board) = board else {
        return;
    };

    let fresh = matches!(event, ChannelEvent::Connected { fresh: true });
    if let Err(e) = board.apply(event).await {
        warn!(error = %e, "Kitchen board unavailable");
        return;
    }

    if fresh {
        let Some(active) = active_orders(orders, backend).await else {
            return;
        };
        if let Err(e) = board.load(active).await {
            warn!(error = %e, "Kitchen board unavailable");
        }
    }
}

/// Active orders for a full refresh. The backend's list replaces the cached
/// one; the cache is the fallback when the backend cannot be reached.
async fn active_orders(orders: &OrderCacheRepository, backend: &dyn SyncBackend) -> Option<Vec<Order>> {
    match backend.fetch_active_orders().await {
        Ok(active) => {
            debug!(count = active.len(), "Reloading board from backend");
            if let Err(e) = orders.replace_active(&active).await {
                warn!(error = %e, "Failed to update order cache");
            }
            return Some(active);
        }
        Err(e) => warn!(error = %e, "Active orders unavailable, using order cache"),
    }

    match orders.list_active().await {
        Ok(active) => {
            debug!(count = active.len(), "Reloading board from order cache");
            Some(active)
        }
        Err(e) => {
            warn!(error = %e, "Failed to read order cache");
            None
        }
    }
}

async fn cache_revision(message: &ChannelMessage, orders: &OrderCacheRepository) -> SyncResult<()> {
    match message {
        ChannelMessage::OrderNew(order)
        | ChannelMessage::OrderUpdate(order)
        | ChannelMessage::KitchenOrder(order)
        | ChannelMessage::KitchenUpdate(order) => {
            if order.status == OrderStatus::Delivered {
                orders.remove(&order.id).await?;
            } else {
                orders.upsert(order).await?;
            }
        }
        ChannelMessage::OrderReady(signal) => {
            cache_signal(orders, &signal.order_id, signal.order.as_ref(), OrderStatus::Ready).await?;
        }
        ChannelMessage::OrderCancelled(signal) => {
            cache_signal(orders, &signal.order_id, signal.order.as_ref(), OrderStatus::Cancelled).await?;
        }
        ChannelMessage::Heartbeat | ChannelMessage::AuthResponse(_) | ChannelMessage::Auth(_) => {}
    }
    Ok(())
}

async fn cache_signal(
    orders: &OrderCacheRepository,
    order_id: &str,
    order: Option<&Order>,
    status: OrderStatus,
) -> SyncResult<()> {
    let cached = match order {
        Some(order) => Some(order.clone()),
        None => orders.get(order_id).await?,
    };

    if let Some(mut order) = cached {
        order.status = status;
        orders.upsert(&order).await?;
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PushOutcome;
    use crate::config::DeviceRole;
    use crate::protocol::{Envelope, OrderSignal};
    use async_trait::async_trait;
    use galley_core::{OrderItem, OrderType, SyncOutboxEntry};
    use tempfile::TempDir;

    struct OfflineBackend;

    #[async_trait]
    impl SyncBackend for OfflineBackend {
        async fn handshake(&self) -> SyncResult<()> {
            Err(SyncError::ConnectionFailed("unreachable".into()))
        }

        async fn push(&self, _entries: &[SyncOutboxEntry]) -> SyncResult<PushOutcome> {
            Err(SyncError::ConnectionFailed("unreachable".into()))
        }

        async fn fetch_active_orders(&self) -> SyncResult<Vec<Order>> {
            Err(SyncError::ConnectionFailed("unreachable".into()))
        }
    }

    /// Reachable backend that reports a fixed set of active orders.
    struct ActiveOrdersBackend(Vec<Order>);

    #[async_trait]
    impl SyncBackend for ActiveOrdersBackend {
        async fn handshake(&self) -> SyncResult<()> {
            Ok(())
        }

        async fn push(&self, _entries: &[SyncOutboxEntry]) -> SyncResult<PushOutcome> {
            Ok(PushOutcome::default())
        }

        async fn fetch_active_orders(&self) -> SyncResult<Vec<Order>> {
            Ok(self.0.clone())
        }
    }

    fn order(id: &str) -> Order {
        Order::new(
            id,
            "A-1",
            OrderType::DineIn,
            vec![OrderItem::new("i1", "p-burger", "Burger", 900, 2)],
            0,
        )
    }

    fn config(dir: &TempDir, role: DeviceRole) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.device.role = role;
        // Nothing listens here; the channel stays in backoff.
        config.backend.ws_url = "ws://127.0.0.1:9/ws".into();
        config.storage.data_dir = Some(dir.path().to_path_buf());
        config
    }

    async fn database() -> Arc<Database> {
        Arc::new(Database::new(DbConfig::in_memory()).await.unwrap())
    }

    #[tokio::test]
    async fn test_submit_order_queues_outbox_entry() {
        let dir = TempDir::new().unwrap();
        let db = database().await;
        let runtime = ClientRuntime::builder(config(&dir, DeviceRole::Pos))
            .with_database(db.clone())
            .with_backend(Arc::new(OfflineBackend))
            .with_connectivity(ConnectivityMonitor::new(false))
            .start()
            .await
            .unwrap();

        assert!(runtime.board().is_none());

        let status = runtime
            .submit_order(&order("ord-1"), OutboxOperation::Create)
            .await
            .unwrap();

        assert_eq!(status.pending_orders, 1);
        assert!(db.orders().get("ord-1").await.unwrap().is_some());

        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_order_rejects_invalid_order() {
        let dir = TempDir::new().unwrap();
        let runtime = ClientRuntime::builder(config(&dir, DeviceRole::Pos))
            .with_database(database().await)
            .with_backend(Arc::new(OfflineBackend))
            .with_connectivity(ConnectivityMonitor::new(false))
            .start()
            .await
            .unwrap();

        let mut bad = order("ord-2");
        bad.items[0].quantity = 0;

        let result = runtime.submit_order(&bad, OutboxOperation::Create).await;
        assert!(matches!(result, Err(SyncError::InvalidMessage(_))));
        assert_eq!(runtime.sync().status().pending_orders, 0);

        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_kitchen_runtime_loads_cached_orders() {
        let dir = TempDir::new().unwrap();
        let db = database().await;
        db.orders().upsert(&order("ord-1")).await.unwrap();

        let mut runtime = ClientRuntime::builder(config(&dir, DeviceRole::Kitchen))
            .with_database(db)
            .with_backend(Arc::new(OfflineBackend))
            .with_connectivity(ConnectivityMonitor::new(false))
            .start()
            .await
            .unwrap();

        let mut events = runtime.take_board_events().unwrap();
        assert!(runtime.take_board_events().is_none());

        let tickets = runtime.board().unwrap().tickets().await.unwrap();
        assert_eq!(tickets.len(), 1);
        assert!(matches!(events.recv().await, Some(BoardEvent::Upserted(_))));

        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_route_event_caches_and_removes_delivered() {
        let db = database().await;
        let orders = db.orders();
        let (board, _events) = KitchenBoard::spawn(std::time::Duration::from_secs(30));

        let new = Envelope::new(ChannelMessage::OrderNew(order("ord-1")), None);
        route_event(ChannelEvent::Message(new), &orders, &OfflineBackend, Some(&board)).await;
        assert!(orders.get("ord-1").await.unwrap().is_some());
        assert_eq!(board.tickets().await.unwrap().len(), 1);

        let mut delivered = order("ord-1");
        delivered.status = OrderStatus::Delivered;
        let update = Envelope::new(ChannelMessage::OrderUpdate(delivered), None);
        route_event(ChannelEvent::Message(update), &orders, &OfflineBackend, Some(&board)).await;

        assert!(orders.get("ord-1").await.unwrap().is_none());
        assert!(board.tickets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_route_event_ready_signal_updates_cached_status() {
        let db = database().await;
        let orders = db.orders();
        orders.upsert(&order("ord-1")).await.unwrap();

        let ready = Envelope::new(ChannelMessage::OrderReady(OrderSignal {
            order_id: "ord-1".into(),
            order: None,
        }), None);
        route_event(ChannelEvent::Message(ready), &orders, &OfflineBackend, None).await;

        let cached = orders.get("ord-1").await.unwrap().unwrap();
        assert_eq!(cached.status, OrderStatus::Ready);
    }

    #[tokio::test]
    async fn test_fresh_connection_falls_back_to_cache() {
        let db = database().await;
        let orders = db.orders();
        let (board, _events) = KitchenBoard::spawn(std::time::Duration::from_secs(30));

        orders.upsert(&order("ord-1")).await.unwrap();
        orders.upsert(&order("ord-2")).await.unwrap();

        route_event(ChannelEvent::Connected { fresh: true }, &orders, &OfflineBackend, Some(&board)).await;

        let ids: Vec<String> = board
            .tickets()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.order.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"ord-1".to_string()));
    }

    #[tokio::test]
    async fn test_fresh_connection_loads_backend_orders() {
        let db = database().await;
        let orders = db.orders();
        let (board, _events) = KitchenBoard::spawn(std::time::Duration::from_secs(30));

        // Delivered while the socket was down; the cache never heard.
        orders.upsert(&order("ord-1")).await.unwrap();
        let backend = ActiveOrdersBackend(vec![order("ord-2")]);

        route_event(ChannelEvent::Connected { fresh: true }, &orders, &backend, Some(&board)).await;

        let ids: Vec<String> = board
            .tickets()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.order.id)
            .collect();
        assert_eq!(ids, vec!["ord-2".to_string()]);
        assert!(orders.get("ord-2").await.unwrap().is_some());
        assert!(orders.get("ord-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_ticket_survives_fresh_connection() {
        let db = database().await;
        let orders = db.orders();
        let (board, _events) = KitchenBoard::spawn(std::time::Duration::from_secs(30));

        let new = Envelope::new(ChannelMessage::OrderNew(order("ord-1")), None);
        route_event(ChannelEvent::Message(new), &orders, &OfflineBackend, Some(&board)).await;
        let cancelled = Envelope::new(
            ChannelMessage::OrderCancelled(OrderSignal {
                order_id: "ord-1".into(),
                order: None,
            }),
            None,
        );
        route_event(ChannelEvent::Message(cancelled), &orders, &OfflineBackend, Some(&board)).await;

        route_event(ChannelEvent::Connected { fresh: true }, &orders, &OfflineBackend, Some(&board)).await;

        let tickets = board.tickets().await.unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].order.id, "ord-1");
        assert!(tickets[0].is_cancelled());
    }
}

//! # Kitchen Board
//!
//! Ticket state for a kitchen display, driven by channel events.
//!
//! ## Ticket Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kitchen Ticket Lifecycle                         │
//! │                                                                         │
//! │  order_new ──► pending ──► preparing ──► ready ──► delivered ──► gone   │
//! │                   │            │           │        (removed at once)   │
//! │                   └────────────┴─────┬─────┘                            │
//! │                                      ▼                                  │
//! │                                  cancelled                              │
//! │                                      │ countdown (cancel_countdown)     │
//! │                         ┌────────────┴─────────────┐                    │
//! │                         ▼                          ▼                    │
//! │              fresh update for the id           timer fires              │
//! │              (abort, restore status)           (remove ticket)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Full Refresh
//! A fresh connection clears the board before it is reloaded. Tickets still
//! counting down survive the reset with their original deadline, and a
//! reload does not restore them.
//!
//! ## Concurrency
//! The board is a single actor task. Channel events, cache loads and timer
//! expiries are all handled one at a time on that task, so reconciliation for
//! an order id is serialized. Every countdown carries a generation number; an
//! expiry whose generation no longer matches is ignored.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::ChannelEvent;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{ChannelMessage, OrderSignal};
use galley_core::{
    annotate_items, annotate_new, has_changed_items_from, AnnotatedItem, ChangeSummary, Order,
    OrderStatus, Transition,
};

// =============================================================================
// Tickets & Events
// =============================================================================

/// A ticket as the kitchen should see it.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    /// Latest revision. `order.status` is the displayed status.
    pub order: Order,

    /// Lines tagged against the previous revision.
    pub items: Vec<AnnotatedItem>,

    /// True when the lines changed in a way the kitchen must see.
    pub items_changed: bool,
}

impl Ticket {
    fn new(order: Order) -> Self {
        let items = annotate_new(&order);
        Ticket {
            order,
            items,
            items_changed: true,
        }
    }

    pub fn summary(&self) -> ChangeSummary {
        ChangeSummary::of(&self.items)
    }

    pub fn is_cancelled(&self) -> bool {
        self.order.status == OrderStatus::Cancelled
    }
}

/// Board changes for the display layer.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    /// A ticket appeared or changed.
    Upserted(Ticket),

    /// A ticket was cancelled and will be removed after `remove_after`.
    Cancelled { ticket: Ticket, remove_after: Duration },

    /// A ticket left the board.
    Removed { order_id: String },

    /// The board was cleared for a full refresh. Cancelled tickets that are
    /// still counting down are published again right after.
    Reset,
}

enum BoardCommand {
    Apply(ChannelEvent),
    Load(Vec<Order>),
    Snapshot(oneshot::Sender<Vec<Ticket>>),
}

struct CountdownElapsed {
    order_id: String,
    generation: u64,
}

struct Countdown {
    generation: u64,
    deadline: Instant,
    task: JoinHandle<()>,
}

// =============================================================================
// Board Handle
// =============================================================================

/// Handle to the board actor. The actor stops when every handle is dropped.
#[derive(Clone)]
pub struct KitchenBoardHandle {
    commands_tx: mpsc::Sender<BoardCommand>,
}

impl KitchenBoardHandle {
    /// Feeds a channel event to the board.
    pub async fn apply(&self, event: ChannelEvent) -> SyncResult<()> {
        self.send(BoardCommand::Apply(event)).await
    }

    /// Adds tickets for orders restored from the local cache.
    pub async fn load(&self, orders: Vec<Order>) -> SyncResult<()> {
        self.send(BoardCommand::Load(orders)).await
    }

    /// Returns the current tickets, oldest first.
    pub async fn tickets(&self) -> SyncResult<Vec<Ticket>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(BoardCommand::Snapshot(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| SyncError::ChannelError("Kitchen board stopped".into()))
    }

    async fn send(&self, command: BoardCommand) -> SyncResult<()> {
        self.commands_tx
            .send(command)
            .await
            .map_err(|_| SyncError::ChannelError("Kitchen board stopped".into()))
    }
}

// =============================================================================
// Kitchen Board
// =============================================================================

/// The board actor.
pub struct KitchenBoard {
    cancel_countdown: Duration,
    tickets: HashMap<String, Ticket>,
    countdowns: HashMap<String, Countdown>,
    next_generation: u64,
    commands_rx: mpsc::Receiver<BoardCommand>,
    elapsed_tx: mpsc::UnboundedSender<CountdownElapsed>,
    elapsed_rx: mpsc::UnboundedReceiver<CountdownElapsed>,
    events_tx: mpsc::Sender<BoardEvent>,
}

impl KitchenBoard {
    /// Spawns the board actor.
    pub fn spawn(cancel_countdown: Duration) -> (KitchenBoardHandle, mpsc::Receiver<BoardEvent>) {
        let (commands_tx, commands_rx) = mpsc::channel(100);
        let (elapsed_tx, elapsed_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(100);

        let board = KitchenBoard {
            cancel_countdown,
            tickets: HashMap::new(),
            countdowns: HashMap::new(),
            next_generation: 0,
            commands_rx,
            elapsed_tx,
            elapsed_rx,
            events_tx,
        };

        tokio::spawn(board.run());

        (KitchenBoardHandle { commands_tx }, events_rx)
    }

    async fn run(mut self) {
        debug!(countdown = ?self.cancel_countdown, "Kitchen board starting");

        loop {
            tokio::select! {
                command = self.commands_rx.recv() => match command {
                    Some(BoardCommand::Apply(event)) => self.apply(event).await,
                    Some(BoardCommand::Load(orders)) => self.load(orders).await,
                    Some(BoardCommand::Snapshot(reply)) => {
                        let _ = reply.send(self.snapshot());
                    }
                    None => break,
                },
                Some(elapsed) = self.elapsed_rx.recv() => self.countdown_elapsed(elapsed).await,
            }
        }

        self.clear_countdowns();
        debug!("Kitchen board stopped");
    }

    async fn apply(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected { fresh: true } => self.reset().await,
            ChannelEvent::Connected { fresh: false } | ChannelEvent::Disconnected => {}
            ChannelEvent::Message(envelope) => match envelope.message {
                ChannelMessage::OrderNew(order)
                | ChannelMessage::OrderUpdate(order)
                | ChannelMessage::KitchenOrder(order)
                | ChannelMessage::KitchenUpdate(order) => self.revision(order).await,
                ChannelMessage::OrderReady(signal) => self.ready(signal).await,
                ChannelMessage::OrderCancelled(signal) => self.cancel(signal.order_id, signal.order).await,
                ChannelMessage::Heartbeat | ChannelMessage::AuthResponse(_) | ChannelMessage::Auth(_) => {}
            },
        }
    }

    /// Applies a new revision of an order.
    async fn revision(&mut self, mut order: Order) {
        match order.status {
            OrderStatus::Cancelled => return self.cancel(order.id.clone(), Some(order)).await,
            OrderStatus::Delivered => return self.remove(&order.id).await,
            _ => {}
        }

        let restoring = self.abort_countdown(&order.id);

        let ticket = match self.tickets.get(&order.id) {
            None => Ticket::new(order),
            Some(previous) => {
                if !restoring {
                    if let Err(e) = previous.order.status.transition(&order.id, order.status) {
                        warn!(error = %e, "Ignoring backwards status change");
                        order.status = previous.order.status;
                    }
                }
                reconcile(order, &previous.order)
            }
        };

        let summary = ticket.summary();
        debug!(
            order_id = %ticket.order.id,
            status = %ticket.order.status,
            added = summary.added,
            removed = summary.removed,
            modified = summary.modified,
            items_changed = ticket.items_changed,
            restored = restoring,
            "Ticket updated"
        );

        self.tickets.insert(ticket.order.id.clone(), ticket.clone());
        self.publish(BoardEvent::Upserted(ticket)).await;
    }

    async fn ready(&mut self, signal: OrderSignal) {
        let order = match signal.order {
            Some(order) => Some(order),
            None => self.tickets.get(&signal.order_id).map(|t| t.order.clone()),
        };

        match order {
            Some(mut order) => {
                order.status = OrderStatus::Ready;
                self.revision(order).await;
            }
            None => debug!(order_id = %signal.order_id, "Ready signal for unknown ticket"),
        }
    }

    async fn cancel(&mut self, order_id: String, order: Option<Order>) {
        if self.countdowns.contains_key(&order_id) {
            debug!(%order_id, "Ticket already counting down");
            return;
        }

        let ticket = match (self.tickets.get(&order_id), order) {
            (Some(previous), Some(order)) => reconcile(order, &previous.order),
            (Some(previous), None) => previous.clone(),
            (None, Some(order)) => Ticket::new(order),
            (None, None) => {
                debug!(%order_id, "Cancel for unknown ticket");
                return;
            }
        };

        let mut ticket = ticket;
        match ticket.order.status.transition(&order_id, OrderStatus::Cancelled) {
            Ok(Transition::Cancelled { from }) => {
                info!(%order_id, %from, countdown = ?self.cancel_countdown, "Ticket cancelled");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Ignoring cancel");
                return;
            }
        }
        ticket.order.status = OrderStatus::Cancelled;

        self.start_countdown(&order_id);
        self.tickets.insert(order_id, ticket.clone());
        self.publish(BoardEvent::Cancelled {
            ticket,
            remove_after: self.cancel_countdown,
        })
        .await;
    }

    async fn remove(&mut self, order_id: &str) {
        self.abort_countdown(order_id);
        if self.tickets.remove(order_id).is_some() {
            debug!(%order_id, "Ticket removed");
            self.publish(BoardEvent::Removed {
                order_id: order_id.to_string(),
            })
            .await;
        }
    }

    async fn reset(&mut self) {
        let countdowns = &self.countdowns;
        self.tickets.retain(|id, _| countdowns.contains_key(id));
        info!(cancelled = self.tickets.len(), "Resetting kitchen board for full refresh");
        self.publish(BoardEvent::Reset).await;

        let now = Instant::now();
        let mut kept: Vec<(Ticket, Duration)> = self
            .tickets
            .values()
            .filter_map(|ticket| {
                self.countdowns
                    .get(&ticket.order.id)
                    .map(|c| (ticket.clone(), c.deadline.saturating_duration_since(now)))
            })
            .collect();
        kept.sort_by(|a, b| a.0.order.created_at.cmp(&b.0.order.created_at));

        for (ticket, remove_after) in kept {
            self.publish(BoardEvent::Cancelled { ticket, remove_after }).await;
        }
    }

    async fn load(&mut self, orders: Vec<Order>) {
        debug!(count = orders.len(), "Loading tickets");
        for order in orders {
            if order.status.is_terminal() {
                continue;
            }
            if self.countdowns.contains_key(&order.id) {
                debug!(order_id = %order.id, "Keeping cancelled ticket over reload");
                continue;
            }
            self.revision(order).await;
        }
    }

    fn snapshot(&self) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self.tickets.values().cloned().collect();
        tickets.sort_by(|a, b| {
            a.order
                .created_at
                .cmp(&b.order.created_at)
                .then_with(|| a.order.id.cmp(&b.order.id))
        });
        tickets
    }

    // =========================================================================
    // Countdowns
    // =========================================================================

    fn start_countdown(&mut self, order_id: &str) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let delay = self.cancel_countdown;
        let deadline = Instant::now() + delay;
        let elapsed_tx = self.elapsed_tx.clone();
        let id = order_id.to_string();

        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = elapsed_tx.send(CountdownElapsed {
                order_id: id,
                generation,
            });
        });

        self.countdowns
            .insert(order_id.to_string(), Countdown { generation, deadline, task });
    }

    /// Stops the countdown for `order_id`. Returns true if one was running.
    fn abort_countdown(&mut self, order_id: &str) -> bool {
        match self.countdowns.remove(order_id) {
            Some(countdown) => {
                countdown.task.abort();
                debug!(%order_id, generation = countdown.generation, "Countdown aborted");
                true
            }
            None => false,
        }
    }

    fn clear_countdowns(&mut self) {
        for (_, countdown) in self.countdowns.drain() {
            countdown.task.abort();
        }
    }

    async fn countdown_elapsed(&mut self, elapsed: CountdownElapsed) {
        let current = self
            .countdowns
            .get(&elapsed.order_id)
            .map(|c| c.generation);

        if current != Some(elapsed.generation) {
            debug!(order_id = %elapsed.order_id, generation = elapsed.generation, "Stale countdown");
            return;
        }

        self.countdowns.remove(&elapsed.order_id);
        if self.tickets.remove(&elapsed.order_id).is_some() {
            info!(order_id = %elapsed.order_id, "Cancelled ticket removed");
            self.publish(BoardEvent::Removed {
                order_id: elapsed.order_id,
            })
            .await;
        }
    }

    async fn publish(&self, event: BoardEvent) {
        // The board keeps working without a display attached.
        let _ = self.events_tx.send(event).await;
    }
}

/// Builds the ticket for `order` as a revision of `previous`.
fn reconcile(order: Order, previous: &Order) -> Ticket {
    let annotated = annotate_items(&order, previous)
        .and_then(|items| has_changed_items_from(&order, previous).map(|changed| (items, changed)));

    match annotated {
        Ok((items, items_changed)) => Ticket {
            order,
            items,
            items_changed,
        },
        Err(e) => {
            warn!(error = %e, "Reconciliation failed, showing as new");
            Ticket::new(order)
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Envelope;
    use galley_core::{ChangeTag, OrderItem, OrderType};

    fn order(id: &str, status: OrderStatus, items: Vec<OrderItem>) -> Order {
        let mut order = Order::new(id, "1", OrderType::DineIn, items, 0);
        order.status = status;
        order
    }

    fn burger(id: &str, qty: i64) -> OrderItem {
        OrderItem::new(id, "p-burger", "Burger", 1200, qty)
    }

    fn msg(message: ChannelMessage) -> ChannelEvent {
        ChannelEvent::Message(Envelope::new(message, None))
    }

    #[test]
    fn test_reconcile_tags_changes() {
        let previous = order("o1", OrderStatus::Pending, vec![burger("i1", 2)]);
        let current = order("o1", OrderStatus::Pending, vec![burger("i1", 3)]);

        let ticket = reconcile(current, &previous);
        assert!(ticket.items_changed);
        assert_eq!(ticket.items[0].tag, ChangeTag::Modified { previous_quantity: 2 });
    }

    #[test]
    fn test_reconcile_id_churn_is_quiet() {
        let previous = order("o1", OrderStatus::Pending, vec![burger("i1", 2)]);
        let current = order("o1", OrderStatus::Pending, vec![burger("i9", 2)]);

        let ticket = reconcile(current, &previous);
        assert!(!ticket.items_changed);
    }

    #[tokio::test]
    async fn test_backwards_status_is_ignored() {
        let (board, mut events) = KitchenBoard::spawn(Duration::from_secs(30));

        board
            .apply(msg(ChannelMessage::OrderNew(order("o1", OrderStatus::Ready, vec![burger("i1", 1)]))))
            .await
            .unwrap();
        board
            .apply(msg(ChannelMessage::OrderUpdate(order("o1", OrderStatus::Pending, vec![burger("i1", 1)]))))
            .await
            .unwrap();

        let tickets = board.tickets().await.unwrap();
        assert_eq!(tickets[0].order.status, OrderStatus::Ready);
        assert!(matches!(events.recv().await, Some(BoardEvent::Upserted(_))));
    }

    #[tokio::test]
    async fn test_delivered_removed_immediately() {
        let (board, mut events) = KitchenBoard::spawn(Duration::from_secs(30));

        board
            .apply(msg(ChannelMessage::OrderNew(order("o1", OrderStatus::Pending, vec![burger("i1", 1)]))))
            .await
            .unwrap();
        board
            .apply(msg(ChannelMessage::OrderUpdate(order("o1", OrderStatus::Delivered, vec![]))))
            .await
            .unwrap();

        assert!(matches!(events.recv().await, Some(BoardEvent::Upserted(_))));
        assert_eq!(
            events.recv().await,
            Some(BoardEvent::Removed {
                order_id: "o1".into()
            })
        );
        assert!(board.tickets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ready_signal_without_order() {
        let (board, _events) = KitchenBoard::spawn(Duration::from_secs(30));

        board
            .apply(msg(ChannelMessage::OrderNew(order("o1", OrderStatus::Preparing, vec![burger("i1", 1)]))))
            .await
            .unwrap();
        board
            .apply(msg(ChannelMessage::OrderReady(OrderSignal {
                order_id: "o1".into(),
                order: None,
            })))
            .await
            .unwrap();

        let tickets = board.tickets().await.unwrap();
        assert_eq!(tickets[0].order.status, OrderStatus::Ready);
    }

    #[tokio::test]
    async fn test_fresh_connection_resets() {
        let (board, mut events) = KitchenBoard::spawn(Duration::from_secs(30));

        board
            .apply(msg(ChannelMessage::KitchenOrder(order("o1", OrderStatus::Pending, vec![burger("i1", 1)]))))
            .await
            .unwrap();
        board.apply(ChannelEvent::Connected { fresh: true }).await.unwrap();

        assert!(matches!(events.recv().await, Some(BoardEvent::Upserted(_))));
        assert_eq!(events.recv().await, Some(BoardEvent::Reset));
        assert!(board.tickets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_skips_terminal_orders() {
        let (board, _events) = KitchenBoard::spawn(Duration::from_secs(30));

        board
            .load(vec![
                order("a", OrderStatus::Pending, vec![burger("i1", 1)]),
                order("b", OrderStatus::Delivered, vec![burger("i2", 1)]),
            ])
            .await
            .unwrap();

        let tickets = board.tickets().await.unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].order.id, "a");
    }
}

//! # Domain Types
//!
//! Core domain types shared by POS terminals, the backend wire format and
//! kitchen displays.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────────┐        ┌─────────────────────┐                 │
//! │  │       Order         │ 1    * │     OrderItem       │                 │
//! │  │  ─────────────────  │───────►│  ─────────────────  │                 │
//! │  │  id (stable)        │        │  id (NOT stable)    │                 │
//! │  │  order_number       │        │  product_id         │                 │
//! │  │  order_type         │        │  product_name       │                 │
//! │  │  status             │        │  quantity           │                 │
//! │  │  totals (cents)     │        │  unit_price_cents   │                 │
//! │  └─────────────────────┘        │  notes, modifiers   │                 │
//! │                                 └─────────────────────┘                 │
//! │                                                                         │
//! │  ┌─────────────────────┐        ┌─────────────────────┐                 │
//! │  │  SyncOutboxEntry    │        │   PendingCounts     │                 │
//! │  │  category, payload  │        │  orders/sales/      │                 │
//! │  │  attempts           │        │  invoices           │                 │
//! │  └─────────────────────┘        └─────────────────────┘                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Revisions
//! Two `Order` values sharing an `id` are revisions of the same logical order.
//! The backend may regenerate `OrderItem::id` on every save, so item ids are
//! only a hint when comparing revisions (see [`crate::reconcile`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;

// =============================================================================
// Order Type
// =============================================================================

/// How the order leaves the kitchen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    DineIn,
    Takeout,
    Delivery,
}

impl Default for OrderType {
    fn default() -> Self {
        OrderType::DineIn
    }
}

// =============================================================================
// Order Status
// =============================================================================

/// Lifecycle status of an order, shared by the backend and kitchen tickets.
///
/// ```text
/// pending ──► preparing ──► ready ──► delivered
///    │            │           │
///    └────────────┴───────────┴──────► cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Received, not yet started.
    Pending,
    /// On the line.
    Preparing,
    /// Waiting at the pass.
    Ready,
    /// Handed to the guest or driver.
    Delivered,
    /// Cancelled by POS or backend.
    Cancelled,
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Pending
    }
}

impl OrderStatus {
    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "preparing" | "in_progress" => Ok(OrderStatus::Preparing),
            "ready" => Ok(OrderStatus::Ready),
            "delivered" | "completed" => Ok(OrderStatus::Delivered),
            "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
            other => Err(ValidationError::InvalidFormat {
                field: "status".to_string(),
                reason: format!("unknown order status '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Order Item
// =============================================================================

/// A priced add-on attached to an order line ("extra cheese").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Modifier {
    pub name: String,
    #[serde(default)]
    pub price_cents: i64,
}

/// A line on an order.
///
/// Product data is denormalized so a kitchen display can render the ticket
/// without a catalog lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderItem {
    /// Line identifier. May be regenerated by the backend on any edit.
    pub id: String,

    /// Catalog product this line refers to.
    pub product_id: String,

    /// Product name at the time the order was placed.
    pub product_name: String,

    /// Unit price in cents at the time the order was placed.
    pub unit_price_cents: i64,

    /// Menu category (for station routing).
    #[serde(default)]
    pub category: Option<String>,

    /// Number of units (always positive).
    pub quantity: i64,

    /// quantity × unit price.
    pub subtotal_cents: i64,

    /// Free-text kitchen instructions ("no onions").
    #[serde(default)]
    pub notes: Option<String>,

    #[serde(default)]
    pub modifiers: Vec<Modifier>,
}

impl OrderItem {
    /// Creates a line with a computed subtotal and no notes or modifiers.
    pub fn new(
        id: impl Into<String>,
        product_id: impl Into<String>,
        product_name: impl Into<String>,
        unit_price_cents: i64,
        quantity: i64,
    ) -> Self {
        OrderItem {
            id: id.into(),
            product_id: product_id.into(),
            product_name: product_name.into(),
            unit_price_cents,
            category: None,
            quantity,
            subtotal_cents: unit_price_cents * quantity,
            notes: None,
            modifiers: Vec::new(),
        }
    }

    /// Sets the kitchen notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Returns the notes, treating absent and empty notes alike.
    #[inline]
    pub fn notes_text(&self) -> &str {
        self.notes.as_deref().unwrap_or("")
    }

    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    #[inline]
    pub fn subtotal(&self) -> Money {
        Money::from_cents(self.subtotal_cents)
    }
}

// =============================================================================
// Order
// =============================================================================

/// A customer order. Owned by the backend; clients hold cached revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Order {
    /// Backend-assigned identifier, stable for the order's whole life.
    pub id: String,

    /// Human-facing number printed on tickets.
    pub order_number: String,

    pub order_type: OrderType,

    #[serde(default)]
    pub status: OrderStatus,

    #[serde(default)]
    pub table_number: Option<String>,

    /// Sequential takeout/pickup number.
    #[serde(default)]
    pub sequence_number: Option<i64>,

    #[serde(default)]
    pub items: Vec<OrderItem>,

    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,

    #[serde(default)]
    pub notes: Option<String>,

    /// Client id of the device that created the order.
    #[serde(default)]
    pub source: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds an order whose totals are computed from its items.
    pub fn new(
        id: impl Into<String>,
        order_number: impl Into<String>,
        order_type: OrderType,
        items: Vec<OrderItem>,
        tax_cents: i64,
    ) -> Self {
        let subtotal: Money = items.iter().map(OrderItem::subtotal).sum();
        let now = Utc::now();

        Order {
            id: id.into(),
            order_number: order_number.into(),
            order_type,
            status: OrderStatus::Pending,
            table_number: None,
            sequence_number: None,
            items,
            subtotal_cents: subtotal.cents(),
            tax_cents,
            total_cents: subtotal.cents() + tax_cents,
            notes: None,
            source: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true while the ticket belongs on a kitchen display.
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Sum of all line quantities.
    pub fn total_quantity(&self) -> i64 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

// =============================================================================
// Sync Outbox
// =============================================================================

/// Category a queued mutation is counted under in the sync status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OutboxCategory {
    Orders,
    Sales,
    Invoices,
}

impl OutboxCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxCategory::Orders => "orders",
            OutboxCategory::Sales => "sales",
            OutboxCategory::Invoices => "invoices",
        }
    }
}

impl fmt::Display for OutboxCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of mutation a queued entry replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OutboxOperation {
    Create,
    Update,
    Cancel,
}

impl OutboxOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxOperation::Create => "create",
            OutboxOperation::Update => "update",
            OutboxOperation::Cancel => "cancel",
        }
    }
}

/// A mutation made locally that the backend has not acknowledged yet.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SyncOutboxEntry {
    pub id: String,
    pub category: OutboxCategory,
    /// Identifier of the order, sale or invoice being mutated.
    pub entity_id: String,
    pub operation: OutboxOperation,
    /// The full entity as JSON.
    pub payload: String,
    /// Number of push attempts so far.
    pub attempts: i64,
    pub last_error: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub attempted_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub synced_at: Option<DateTime<Utc>>,
}

/// Unacknowledged mutations per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PendingCounts {
    pub orders: i64,
    pub sales: i64,
    pub invoices: i64,
}

impl PendingCounts {
    pub fn total(&self) -> i64 {
        self.orders + self.sales + self.invoices
    }

    /// Adds `count` to the counter for `category`.
    pub fn add(&mut self, category: OutboxCategory, count: i64) {
        match category {
            OutboxCategory::Orders => self.orders += count,
            OutboxCategory::Sales => self.sales += count,
            OutboxCategory::Invoices => self.invoices += count,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

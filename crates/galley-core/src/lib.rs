//! # galley-core: Pure Order Logic for Galley
//!
//! Everything a kitchen display or POS terminal needs to reason about orders
//! without touching a socket, a file or a clock.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Galley Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │        galley-sync (channel, orchestrator, kitchen board)       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ galley-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ reconcile │  │  ticket   │  │ validation│  │   │
//! │  │   │   Order   │  │ ChangeTag │  │  status   │  │  totals   │  │   │
//! │  │   │ OrderItem │  │  diffing  │  │  machine  │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                galley-db (outbox + order cache)                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Order, OrderItem and the outbox entry shape
//! - [`money`] - Integer cents
//! - [`reconcile`] - Revision diffing for the kitchen display
//! - [`ticket`] - Kitchen ticket status transitions
//! - [`validation`] - Order invariants
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use galley_core::reconcile::has_changed_items_from;
//!
//! if has_changed_items_from(&incoming, &cached)? {
//!     redraw(&incoming);
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod reconcile;
pub mod ticket;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use reconcile::{
    annotate_items, annotate_new, has_changed_items_from, AnnotatedItem, ChangeSummary, ChangeTag,
};
pub use ticket::Transition;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum quantity of a single order line.
///
/// Guards against fat-fingered entries (1000 instead of 10) reaching the
/// kitchen.
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Maximum number of lines on a single order.
pub const MAX_ORDER_ITEMS: usize = 200;

/// Default time a cancelled ticket stays on the kitchen display.
pub const DEFAULT_CANCEL_COUNTDOWN_SECS: u64 = 30;

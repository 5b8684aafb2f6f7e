//! # Repository Module
//!
//! Repository implementations for the client database.
//!
//! ```text
//! Database
//! ├── outbox()  → OutboxRepository      sync_outbox table
//! └── orders()  → OrderCacheRepository  order_cache table
//! ```
//!
//! Each repository owns a clone of the pool and keeps its SQL in one place.

pub mod order;
pub mod outbox;

pub use order::OrderCacheRepository;
pub use outbox::OutboxRepository;

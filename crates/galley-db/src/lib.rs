//! # galley-db: Local Database Layer for Galley Clients
//!
//! SQLite storage for one POS or kitchen client, accessed through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Galley Client Data Flow                          │
//! │                                                                         │
//! │  SyncOrchestrator            KitchenBoard runtime                      │
//! │       │                            │                                    │
//! │       ▼                            ▼                                    │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     galley-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │◄───│ OutboxRepo     │    │  (embedded)  │  │   │
//! │  │   │  SqlitePool   │    │ OrderCacheRepo │    │ 001_init.sql │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  <data_dir>/galley.db                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use galley_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::in_dir(&data_dir)).await?;
//! let counts = db.outbox().pending_counts().await?;
//! ```

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig, DATABASE_FILE_NAME};
pub use repository::{OrderCacheRepository, OutboxRepository};

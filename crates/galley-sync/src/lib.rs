//! # galley-sync: Sync Engine for Galley Clients
//!
//! Everything a POS terminal or kitchen display does over the network, on a
//! timer or on disk outside the database.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Galley Client Architecture                       │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  ClientRuntime (wires everything)                │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Sync           │  │ Messaging      │  │ Kitchen Board          │    │
//! │  │ Orchestrator   │  │ Channel        │  │                        │    │
//! │  │                │  │                │  │ Reconciles revisions,  │    │
//! │  │ Replays outbox │  │ WebSocket with │  │ runs cancel countdowns │    │
//! │  │ when online    │  │ auth, heartbeat│  │                        │    │
//! │  │                │  │ & backoff      │  │                        │    │
//! │  └───────▲────────┘  └────────────────┘  └────────────────────────┘    │
//! │          │                                                              │
//! │  ┌───────┴────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Connectivity   │  │ Secret Store   │  │ ClientConfig           │    │
//! │  │ Monitor        │  │ AES-256-GCM    │  │ TOML + GALLEY_* env    │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  STATUS SURFACE:                                                       │
//! │  • SyncStatus on a watch channel + sync_status.json                    │
//! │  • StatusNotifier toasts (info / warning / error)                      │
//! │  • BoardEvent stream for the display                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`runtime`] - `ClientRuntime` wiring all components
//! - [`orchestrator`] - Outbox replay and sync status
//! - [`status`] - `SyncStatus` and its on-disk snapshot
//! - [`backend`] - `SyncBackend` trait and HTTP implementation
//! - [`channel`] - WebSocket messaging channel
//! - [`protocol`] - Envelope and message types
//! - [`kitchen`] - Kitchen board actor
//! - [`connectivity`] - Online/offline tracking
//! - [`secret`] - Encryption of secrets at rest
//! - [`config`] - Client configuration
//! - [`events`] - User-facing status notifications
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use galley_sync::{ClientConfig, ClientRuntime, TracingNotifier};
//!
//! let config = ClientConfig::load(None)?;
//! let mut runtime = ClientRuntime::builder(config)
//!     .with_notifier(Arc::new(TracingNotifier))
//!     .start()
//!     .await?;
//!
//! let status = runtime.sync().status();
//! println!("Pending: {}", status.pending_total());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod backend;
pub mod channel;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod events;
pub mod kitchen;
pub mod orchestrator;
pub mod protocol;
pub mod runtime;
pub mod secret;
pub mod status;

// =============================================================================
// Re-exports
// =============================================================================

pub use backend::{FailedEntry, HttpBackend, PushOutcome, SyncBackend};
pub use channel::{ChannelConfig, ChannelEvent, ChannelHandle, ConnectionState, MessagingChannel};
pub use config::{ClientConfig, DeviceRole};
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use events::{NoOpNotifier, Severity, StatusNotifier, TracingNotifier};
pub use kitchen::{BoardEvent, KitchenBoard, KitchenBoardHandle, Ticket};
pub use orchestrator::{OrchestratorConfig, SyncOrchestrator, SyncOrchestratorHandle, MAX_RETRY_ATTEMPTS};
pub use protocol::{ChannelMessage, Envelope, MessageType, OrderSignal};
pub use runtime::{ClientRuntime, ClientRuntimeBuilder};
pub use secret::SecretStore;
pub use status::{SnapshotStore, SyncState, SyncStatus};

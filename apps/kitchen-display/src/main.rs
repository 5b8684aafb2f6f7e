//! # Galley Kitchen Display Entry Point
//!
//! Headless client for a kitchen display or POS terminal. Tickets and sync
//! status go to the log; a display frontend attaches to the same runtime.
//!
//! ## Startup Sequence
//! 1. Initialize tracing (logging)
//! 2. Load `client.toml` (path from the first argument, or the platform
//!    default) with `GALLEY_*` overrides
//! 3. Encrypt a plaintext device token and save the config if it changed
//! 4. Open `<data_dir>/galley.db` and run migrations
//! 5. Start `ClientRuntime`
//! 6. Log board events and sync status until ctrl-c

mod error;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use error::{AppError, AppResult};
use galley_db::{Database, DbConfig};
use galley_sync::{BoardEvent, ClientConfig, ClientRuntime, SecretStore, TracingNotifier};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Galley client failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> AppResult<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let mut config = ClientConfig::load(config_path.clone())?;

    let data_dir = config.data_dir()?;
    std::fs::create_dir_all(&data_dir).map_err(|source| AppError::DataDir {
        path: data_dir.display().to_string(),
        source,
    })?;
    info!(?data_dir, role = %config.role(), "Starting Galley client");

    let secrets = SecretStore::in_dir(&data_dir);
    if config.upgrade_secrets(&secrets)? {
        config.save(config_path)?;
    }

    let database = Arc::new(Database::new(DbConfig::in_dir(&data_dir)).await?);
    info!("Database connected and migrations applied");

    let mut runtime = ClientRuntime::builder(config)
        .with_database(database)
        .with_secret_store(secrets)
        .with_notifier(Arc::new(TracingNotifier))
        .start()
        .await?;

    let display = runtime
        .take_board_events()
        .map(|events| tokio::spawn(log_board(events)));

    let mut status = runtime.sync().subscribe();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Ctrl-C received");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                info!(
                    status = %current.status,
                    pending = current.pending_total(),
                    last_sync_at = ?current.last_sync_at,
                    error = ?current.error,
                    "Sync status"
                );
            }
        }
    }

    runtime.shutdown().await?;
    if let Some(display) = display {
        let _ = display.await;
    }
    Ok(())
}

/// Writes board changes to the log.
async fn log_board(mut events: mpsc::Receiver<BoardEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            BoardEvent::Upserted(ticket) => {
                let summary = ticket.summary();
                info!(
                    order_id = %ticket.order.id,
                    number = %ticket.order.order_number,
                    status = %ticket.order.status,
                    items_changed = ticket.items_changed,
                    added = summary.added,
                    removed = summary.removed,
                    modified = summary.modified,
                    "Ticket"
                );
            }
            BoardEvent::Cancelled { ticket, remove_after } => {
                info!(
                    order_id = %ticket.order.id,
                    number = %ticket.order.order_number,
                    ?remove_after,
                    "Ticket cancelled"
                );
            }
            BoardEvent::Removed { order_id } => info!(%order_id, "Ticket removed"),
            BoardEvent::Reset => info!("Board reset"),
        }
    }
}

/// Initializes the tracing subscriber.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=galley=trace` - Trace the galley crates only
/// - Default: `info,galley=debug,sqlx=warn`
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,galley=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();
}

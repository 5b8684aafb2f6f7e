//! # Application Error Type
//!
//! Startup failures of the headless client. Everything after startup is
//! handled inside the runtime and reported through logs and notifications.

use galley_db::DbError;
use galley_sync::SyncError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("Data directory {path}: {source}")]
    DataDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type AppResult<T> = Result<T, AppError>;

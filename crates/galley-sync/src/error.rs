//! # Sync Error Types
//!
//! Error types for everything in galley-sync.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │       Io        │  │     Crypto      │  │       Offline           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  KeyStorage     │  │  Crypto         │  │  Offline                │ │
//! │  │  KeyFileCorrupt │  │                 │  │                         │ │
//! │  │  SnapshotIo     │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Protocol     │  │     Timeout     │  │      Transport          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidMessage │  │  Timeout        │  │  ConnectionFailed       │ │
//! │  │  Serialization  │  │  RetriesExhaust │  │  Disconnected           │ │
//! │  │  AuthRejected   │  │                 │  │  WebSocketError         │ │
//! │  │  Backend        │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Config: InvalidConfig, InvalidUrl, MissingDeviceId, Load/Save         │
//! │  Internal: DatabaseError, ChannelError, ShuttingDown, Internal         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Handling Policy
//! - `Crypto` is recovered from only inside `SecretStore::encrypt_if_needed`
//! - `Io` on key access is always surfaced
//! - `Offline` is logged at info and shown as a status, never alarmed
//! - channel `Timeout` reconnects; it reaches the user only as
//!   `RetriesExhausted`

use std::fmt;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Coarse error category used by callers to pick a handling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    Crypto,
    Offline,
    Protocol,
    Timeout,
    Config,
    Transport,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Io => "io",
            ErrorKind::Crypto => "crypto",
            ErrorKind::Offline => "offline",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Config => "config",
            ErrorKind::Transport => "transport",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Sync error type covering all galley-sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Io Errors
    // =========================================================================
    /// The key directory or key file cannot be created or read.
    #[error("Key storage unavailable at {path}: {reason}")]
    KeyStorage { path: String, reason: String },

    /// The key file exists but does not hold exactly 32 bytes.
    #[error("Key file {path} is corrupt: expected 32 bytes, found {len}")]
    KeyFileCorrupt { path: String, len: usize },

    /// The sync status snapshot cannot be written or read.
    #[error("Sync status snapshot error: {0}")]
    SnapshotIo(String),

    // =========================================================================
    // Crypto Errors
    // =========================================================================
    /// Cipher initialization failed, or a ciphertext is malformed or fails
    /// authentication.
    #[error("Crypto error: {0}")]
    Crypto(String),

    // =========================================================================
    // Offline
    // =========================================================================
    /// Sync attempted without connectivity.
    #[error("Device is offline")]
    Offline,

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Malformed envelope or missing required field.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Failed to serialize or deserialize a payload.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// The backend answered the auth handshake with `success: false`.
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// The backend answered with an error status.
    #[error("Backend error: {message}")]
    Backend { message: String, retryable: bool },

    // =========================================================================
    // Timeout Errors
    // =========================================================================
    /// A bounded wait expired.
    #[error("{operation} timed out after {secs} seconds")]
    Timeout { operation: String, secs: u64 },

    /// The channel gave up reconnecting.
    #[error("Gave up after {attempts} consecutive connection attempts")]
    RetriesExhausted { attempts: u32 },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Device ID missing from the configuration.
    #[error("Device ID not configured. Run initial setup first.")]
    MissingDeviceId,

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed by the peer.
    #[error("Disconnected from backend")]
    Disconnected,

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// An internal task channel closed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<galley_db::DbError> for SyncError {
    fn from(err: galley_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            WsError::Url(url) => SyncError::InvalidUrl(url.to_string()),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout {
                operation: "backend request".to_string(),
                secs: 0,
            }
        } else if err.is_decode() {
            SyncError::SerializationFailed(err.to_string())
        } else if let Some(status) = err.status() {
            SyncError::Backend {
                message: err.to_string(),
                retryable: status.is_server_error(),
            }
        } else {
            SyncError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Builds a timeout error for `operation`.
    pub fn timeout(operation: impl Into<String>, after: std::time::Duration) -> Self {
        SyncError::Timeout {
            operation: operation.into(),
            secs: after.as_secs(),
        }
    }

    /// Returns the coarse category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::KeyStorage { .. } | SyncError::KeyFileCorrupt { .. } | SyncError::SnapshotIo(_) => {
                ErrorKind::Io
            }
            SyncError::Crypto(_) => ErrorKind::Crypto,
            SyncError::Offline => ErrorKind::Offline,
            SyncError::InvalidMessage(_)
            | SyncError::SerializationFailed(_)
            | SyncError::AuthRejected(_)
            | SyncError::Backend { .. } => ErrorKind::Protocol,
            SyncError::Timeout { .. } | SyncError::RetriesExhausted { .. } => ErrorKind::Timeout,
            SyncError::InvalidConfig(_)
            | SyncError::InvalidUrl(_)
            | SyncError::MissingDeviceId
            | SyncError::ConfigLoadFailed(_)
            | SyncError::ConfigSaveFailed(_) => ErrorKind::Config,
            SyncError::ConnectionFailed(_) | SyncError::Disconnected | SyncError::WebSocketError(_) => {
                ErrorKind::Transport
            }
            SyncError::DatabaseError(_)
            | SyncError::ChannelError(_)
            | SyncError::ShuttingDown
            | SyncError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the operation may succeed when retried later.
    ///
    /// ## Retryable Errors
    /// - Transport failures and timeouts
    /// - Offline (connectivity may return)
    /// - Backend errors the backend marked retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Backend { retryable, .. } => *retryable,
            SyncError::RetriesExhausted { .. } => false,
            other => matches!(
                other.kind(),
                ErrorKind::Transport | ErrorKind::Timeout | ErrorKind::Offline
            ),
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        self.kind() == ErrorKind::Config
    }

    /// Returns true if this error indicates a protocol mismatch.
    pub fn is_protocol_error(&self) -> bool {
        self.kind() == ErrorKind::Protocol
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("network error".into()).is_retryable());
        assert!(SyncError::Disconnected.is_retryable());
        assert!(SyncError::timeout("auth", Duration::from_secs(5)).is_retryable());
        assert!(SyncError::Offline.is_retryable());
        assert!(SyncError::Backend {
            message: "503".into(),
            retryable: true
        }
        .is_retryable());

        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::MissingDeviceId.is_retryable());
        assert!(!SyncError::Crypto("tag mismatch".into()).is_retryable());
        assert!(!SyncError::RetriesExhausted { attempts: 5 }.is_retryable());
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            SyncError::KeyFileCorrupt {
                path: "/k".into(),
                len: 3
            }
            .kind(),
            ErrorKind::Io
        );
        assert_eq!(SyncError::Offline.kind(), ErrorKind::Offline);
        assert_eq!(SyncError::AuthRejected("nope".into()).kind(), ErrorKind::Protocol);
        assert_eq!(SyncError::RetriesExhausted { attempts: 1 }.kind(), ErrorKind::Timeout);
        assert!(SyncError::InvalidUrl("x".into()).is_config_error());
        assert!(SyncError::InvalidMessage("x".into()).is_protocol_error());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::timeout("auth_response", Duration::from_secs(10));
        assert_eq!(err.to_string(), "auth_response timed out after 10 seconds");
        assert_eq!(ErrorKind::Crypto.to_string(), "crypto");
    }
}

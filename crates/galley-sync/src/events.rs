//! # Status Notifications
//!
//! The toast surface the client shows to staff. Components report
//! user-visible conditions here; the UI layer decides how to render them.

use std::fmt;
use tracing::{error, info, warn};

/// How prominently a status should be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Receives user-facing status messages.
pub trait StatusNotifier: Send + Sync {
    fn notify(&self, status: &str, severity: Severity);
}

/// Discards everything.
pub struct NoOpNotifier;

impl StatusNotifier for NoOpNotifier {
    fn notify(&self, _status: &str, _severity: Severity) {}
}

/// Writes notifications to the log. Used by the headless binary.
pub struct TracingNotifier;

impl StatusNotifier for TracingNotifier {
    fn notify(&self, status: &str, severity: Severity) {
        match severity {
            Severity::Info => info!(target: "galley::notify", %status),
            Severity::Warning => warn!(target: "galley::notify", %status),
            Severity::Error => error!(target: "galley::notify", %status),
        }
    }
}

//! # Error Types
//!
//! Domain-specific error types for galley-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  galley-core errors (this file)                                        │
//! │  ├── CoreError        - Contract violations in order logic             │
//! │  └── ValidationError  - Order invariant failures                       │
//! │                                                                         │
//! │  galley-db errors (separate crate)                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  galley-sync errors (separate crate)                                   │
//! │  └── SyncError        - Io / Crypto / Offline / Protocol / Timeout     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Divergence between two revisions of an order is data, not failure. The
//! only reconciliation error is comparing two different orders.

use thiserror::Error;

use crate::types::OrderStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core order logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Two revisions passed to the reconciliation engine belong to
    /// different orders.
    ///
    /// ## When This Occurs
    /// - A caller looked up the cached revision under the wrong key
    /// - A message router mixed up order ids
    ///
    /// This is a programming error upstream, never a normal divergence.
    #[error("Cannot reconcile order {current} against a revision of order {previous}")]
    OrderMismatch { current: String, previous: String },

    /// A ticket was asked to move backwards or out of a terminal state.
    #[error("Invalid ticket transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// Order failed an invariant check.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Order invariant violations.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    Negative { field: String },

    /// A computed amount does not match its components.
    #[error("{field} is {actual} but should be {expected}")]
    Mismatch {
        field: String,
        expected: i64,
        actual: i64,
    },

    /// Invalid format (e.g., invalid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_mismatch_message() {
        let err = CoreError::OrderMismatch {
            current: "ord-2".to_string(),
            previous: "ord-1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot reconcile order ord-2 against a revision of order ord-1"
        );
    }

    #[test]
    fn test_transition_message() {
        let err = CoreError::InvalidTransition {
            order_id: "ord-1".to_string(),
            from: OrderStatus::Ready,
            to: OrderStatus::Pending,
        };
        assert_eq!(
            err.to_string(),
            "Invalid ticket transition for order ord-1: ready -> pending"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}

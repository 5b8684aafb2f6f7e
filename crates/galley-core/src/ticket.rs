//! # Kitchen Ticket Transitions
//!
//! Status rules for a ticket on a kitchen display.
//!
//! ```text
//!   pending ──► preparing ──► ready ──► delivered
//!      │  └──────────┼─────────►│  (forward skips allowed)
//!      │             │          │
//!      └─────────────┴──────────┴────► cancelled
//!
//!   delivered, cancelled: terminal
//!   same status: no-op
//!   backwards: rejected
//! ```
//!
//! Backend revisions may coalesce steps (a ticket can go straight from
//! `pending` to `ready`), so forward skips are legal. A cancelled ticket that
//! receives a fresh update during its countdown is revived by the kitchen
//! board directly; that path does not go through [`OrderStatus::transition`].

use crate::error::{CoreError, CoreResult};
use crate::types::OrderStatus;

/// Outcome of applying a status to a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Same status as before.
    Unchanged,
    /// Moved forward along the preparation line.
    Advanced { from: OrderStatus, to: OrderStatus },
    /// Moved to `cancelled` from a non-terminal status.
    Cancelled { from: OrderStatus },
}

impl OrderStatus {
    /// Returns true for statuses a ticket never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Position along the preparation line. `None` for `cancelled`.
    fn rank(&self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Preparing => Some(1),
            OrderStatus::Ready => Some(2),
            OrderStatus::Delivered => Some(3),
            OrderStatus::Cancelled => None,
        }
    }

    /// Returns true if a ticket in this status may move to `to`.
    ///
    /// ```rust
    /// use galley_core::types::OrderStatus;
    ///
    /// assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Ready));
    /// assert!(!OrderStatus::Ready.can_transition_to(OrderStatus::Preparing));
    /// assert!(OrderStatus::Ready.can_transition_to(OrderStatus::Cancelled));
    /// ```
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        if *self == to {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), to.rank()) {
            (Some(from), Some(to)) => to > from,
            // cancelled is reachable from every non-terminal status
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Applies `to`, returning what kind of move it was.
    ///
    /// ## Errors
    /// [`CoreError::InvalidTransition`] for backwards moves and moves out of a
    /// terminal status.
    pub fn transition(self, order_id: &str, to: OrderStatus) -> CoreResult<Transition> {
        if self == to {
            return Ok(Transition::Unchanged);
        }
        if !self.can_transition_to(to) {
            return Err(CoreError::InvalidTransition {
                order_id: order_id.to_string(),
                from: self,
                to,
            });
        }
        Ok(match to {
            OrderStatus::Cancelled => Transition::Cancelled { from: self },
            _ => Transition::Advanced { from: self, to },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    const ALL: [OrderStatus; 5] = [Pending, Preparing, Ready, Delivered, Cancelled];

    #[test]
    fn test_transition_table() {
        // rows: from, columns: to (same order as ALL)
        let expected = [
            [true, true, true, true, true],
            [false, true, true, true, true],
            [false, false, true, true, true],
            [false, false, false, true, false],
            [false, false, false, false, true],
        ];

        for (i, from) in ALL.iter().enumerate() {
            for (j, to) in ALL.iter().enumerate() {
                assert_eq!(
                    from.can_transition_to(*to),
                    expected[i][j],
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(Delivered.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!Pending.is_terminal());
        assert!(!Ready.is_terminal());
    }

    #[test]
    fn test_same_status_is_noop() {
        assert_eq!(Ready.transition("o1", Ready).unwrap(), Transition::Unchanged);
        assert_eq!(
            Cancelled.transition("o1", Cancelled).unwrap(),
            Transition::Unchanged
        );
    }

    #[test]
    fn test_forward_skip() {
        assert_eq!(
            Pending.transition("o1", Ready).unwrap(),
            Transition::Advanced {
                from: Pending,
                to: Ready
            }
        );
    }

    #[test]
    fn test_cancel_from_any_active_status() {
        for from in [Pending, Preparing, Ready] {
            assert_eq!(
                from.transition("o1", Cancelled).unwrap(),
                Transition::Cancelled { from }
            );
        }
        assert!(Delivered.transition("o1", Cancelled).is_err());
    }

    #[test]
    fn test_backwards_rejected() {
        let err = Ready.transition("o7", Preparing).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransition { ref order_id, from: Ready, to: Preparing } if order_id == "o7"
        ));
    }
}

//! # Validation Module
//!
//! Invariant checks for orders arriving from the POS or the backend.
//!
//! ## Invariants
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Order Invariants                                   │
//! │                                                                         │
//! │  Order                                                                  │
//! │  ├── id is non-empty                                                   │
//! │  ├── subtotal, tax, total >= 0                                         │
//! │  ├── total == subtotal + tax                                           │
//! │  └── at most MAX_ORDER_ITEMS lines                                     │
//! │                                                                         │
//! │  OrderItem                                                              │
//! │  ├── 0 < quantity <= MAX_ITEM_QUANTITY                                 │
//! │  ├── unit price >= 0                                                   │
//! │  └── subtotal == quantity × unit price                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Modifiers may change the displayed line total; they are not part of the
//! subtotal invariant.

use crate::error::ValidationError;
use crate::types::{Order, OrderItem};
use crate::{MAX_ITEM_QUANTITY, MAX_ORDER_ITEMS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Field Validators
// =============================================================================

/// Validates a line quantity.
///
/// ```rust
/// use galley_core::validation::validate_quantity;
///
/// assert!(validate_quantity(2).is_ok());
/// assert!(validate_quantity(0).is_err());
/// ```
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates that an amount in cents is not negative.
pub fn validate_amount_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::Negative {
            field: field.to_string(),
        });
    }

    Ok(())
}

/// Validates an identifier is present.
pub fn validate_id(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    Ok(())
}

/// Validates a UUID string, used for locally generated ids.
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    validate_id("id", id)?;

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Entity Validators
// =============================================================================

/// Validates a single order line.
pub fn validate_item(item: &OrderItem) -> ValidationResult<()> {
    validate_id("item id", &item.id)?;
    validate_id("product id", &item.product_id)?;
    validate_quantity(item.quantity)?;
    validate_amount_cents("unit price", item.unit_price_cents)?;

    let expected = item.unit_price().multiply_quantity(item.quantity).cents();
    if item.subtotal_cents != expected {
        return Err(ValidationError::Mismatch {
            field: format!("subtotal of item {}", item.id),
            expected,
            actual: item.subtotal_cents,
        });
    }

    Ok(())
}

/// Validates a whole order, including every line.
///
/// ```rust
/// use galley_core::types::{Order, OrderItem, OrderType};
/// use galley_core::validation::validate_order;
///
/// let order = Order::new(
///     "ord-1",
///     "17",
///     OrderType::DineIn,
///     vec![OrderItem::new("i1", "p1", "Soup", 600, 2)],
///     96,
/// );
/// assert!(validate_order(&order).is_ok());
/// ```
pub fn validate_order(order: &Order) -> ValidationResult<()> {
    validate_id("order id", &order.id)?;
    validate_amount_cents("subtotal", order.subtotal_cents)?;
    validate_amount_cents("tax", order.tax_cents)?;
    validate_amount_cents("total", order.total_cents)?;

    let expected_total = order.subtotal_cents + order.tax_cents;
    if order.total_cents != expected_total {
        return Err(ValidationError::Mismatch {
            field: "total".to_string(),
            expected: expected_total,
            actual: order.total_cents,
        });
    }

    if order.items.len() > MAX_ORDER_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "order items".to_string(),
            min: 0,
            max: MAX_ORDER_ITEMS as i64,
        });
    }

    order.items.iter().try_for_each(validate_item)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderType;

    fn order() -> Order {
        Order::new(
            "ord-1",
            "17",
            OrderType::DineIn,
            vec![
                OrderItem::new("i1", "p1", "Soup", 600, 2),
                OrderItem::new("i2", "p2", "Bread", 250, 1),
            ],
            145,
        )
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(999).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(1000).is_err());
    }

    #[test]
    fn test_valid_order() {
        assert!(validate_order(&order()).is_ok());
    }

    #[test]
    fn test_total_must_equal_subtotal_plus_tax() {
        let mut order = order();
        order.total_cents += 1;

        let err = validate_order(&order).unwrap_err();
        assert!(matches!(err, ValidationError::Mismatch { ref field, .. } if field == "total"));
    }

    #[test]
    fn test_negative_tax_rejected() {
        let mut order = order();
        order.tax_cents = -5;
        order.total_cents = order.subtotal_cents - 5;
        assert!(matches!(
            validate_order(&order),
            Err(ValidationError::Negative { .. })
        ));
    }

    #[test]
    fn test_item_subtotal_must_match() {
        let mut order = order();
        order.items[0].subtotal_cents = 1;
        assert!(matches!(
            validate_order(&order),
            Err(ValidationError::Mismatch { .. })
        ));
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("").is_err());
        assert!(validate_uuid("not-a-uuid").is_err());
    }
}

//! # Reconciliation Engine
//!
//! Compares two revisions of the same order and decides whether the kitchen
//! needs to see anything new.
//!
//! ## Why Item Ids Are Not Enough
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  The backend re-creates order lines on every save:                      │
//! │                                                                         │
//! │   revision 1                         revision 2                         │
//! │   ┌──────────────────────────┐       ┌──────────────────────────┐      │
//! │   │ x1  Burger ×2  "no bun"  │  ──►  │ x7  Burger ×2  "no bun"  │      │
//! │   │ x2  Fries  ×1            │       │ x8  Fries  ×1            │      │
//! │   └──────────────────────────┘       └──────────────────────────┘      │
//! │                                                                         │
//! │   Nothing changed for the cook, but no id survived the save.            │
//! │   Comparing by id alone would flash the whole ticket as new.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Change Test
//! ```text
//! has_changed_items_from(current, previous)
//!      │
//!      ├── different order ids?        → Err(OrderMismatch)
//!      │
//!      ├── unit counts differ?         → true   (fast path)
//!      │
//!      ├── same item id, different     → true   (id-stable edit)
//!      │   quantity or notes?
//!      │
//!      ├── grouped by product:         → true   (id churn fallback)
//!      │   product sets, summed
//!      │   quantity, sorted notes
//!      │   differ?
//!      │
//!      └── otherwise                   → false
//! ```
//!
//! The fast path counts units (sum of quantities) rather than lines, so a
//! line split into two lines of the same product with the same total is not
//! reported as a change. Absent and empty notes are equivalent and do not take
//! part in the notes multiset.
//!
//! ## Per-Item Annotation
//! [`annotate_items`] tags each line for incremental rendering. It matches by
//! id only and is best-effort: under id churn it reports every line as
//! added/removed even when [`has_changed_items_from`] says nothing changed.
//! Callers gate rendering on the boolean test and use annotations for
//! highlighting.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::types::{Order, OrderItem};

// =============================================================================
// Change Annotations
// =============================================================================

/// Per-line change tag. Derived on arrival of a revision, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum ChangeTag {
    Unchanged,
    Added,
    Removed,
    /// Same line, different quantity or notes. Carries the old quantity for a
    /// "was 2, now 3" display.
    Modified { previous_quantity: i64 },
}

/// An order line with its change tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AnnotatedItem {
    pub item: OrderItem,
    pub tag: ChangeTag,
}

/// Tag counts, mostly for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub unchanged: usize,
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

impl ChangeSummary {
    /// Counts the tags of an annotated ticket.
    pub fn of(items: &[AnnotatedItem]) -> Self {
        items.iter().fold(ChangeSummary::default(), |mut acc, a| {
            match a.tag {
                ChangeTag::Unchanged => acc.unchanged += 1,
                ChangeTag::Added => acc.added += 1,
                ChangeTag::Removed => acc.removed += 1,
                ChangeTag::Modified { .. } => acc.modified += 1,
            }
            acc
        })
    }

    pub fn is_quiet(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.modified == 0
    }
}

// =============================================================================
// Change Test
// =============================================================================

/// Returns true when `current` differs from `previous` in a way the kitchen
/// must see.
///
/// ## Errors
/// [`CoreError::OrderMismatch`] when the revisions belong to different
/// orders. Divergence itself is never an error.
///
/// ## Example
/// ```rust
/// use galley_core::reconcile::has_changed_items_from;
/// use galley_core::types::{Order, OrderItem, OrderType};
///
/// let before = Order::new("ord-1", "12", OrderType::DineIn,
///     vec![OrderItem::new("x1", "burger", "Burger", 1250, 2)], 0);
/// let mut after = before.clone();
/// after.items[0].id = "x2".to_string(); // backend re-created the line
///
/// assert!(!has_changed_items_from(&after, &before).unwrap());
/// ```
pub fn has_changed_items_from(current: &Order, previous: &Order) -> CoreResult<bool> {
    ensure_same_order(current, previous)?;

    // 1. Fast path
    if unit_count(&current.items) != unit_count(&previous.items) {
        return Ok(true);
    }

    // 2. Lines whose id survived the save
    let previous_by_id = index_by_id(&previous.items);
    let edited = current.items.iter().any(|item| {
        previous_by_id
            .get(item.id.as_str())
            .is_some_and(|prev| line_differs(item, prev))
    });
    if edited {
        return Ok(true);
    }

    // 3. Id churn fallback
    Ok(group_by_product(&current.items) != group_by_product(&previous.items))
}

/// Tags every line of `current` against `previous`, then appends the lines
/// that disappeared as [`ChangeTag::Removed`].
pub fn annotate_items(current: &Order, previous: &Order) -> CoreResult<Vec<AnnotatedItem>> {
    ensure_same_order(current, previous)?;

    let previous_by_id = index_by_id(&previous.items);
    let current_ids: HashSet<&str> = current.items.iter().map(|i| i.id.as_str()).collect();

    let mut annotated: Vec<AnnotatedItem> = current
        .items
        .iter()
        .map(|item| {
            let tag = match previous_by_id.get(item.id.as_str()) {
                None => ChangeTag::Added,
                Some(prev) if line_differs(item, prev) => ChangeTag::Modified {
                    previous_quantity: prev.quantity,
                },
                Some(_) => ChangeTag::Unchanged,
            };
            AnnotatedItem {
                item: item.clone(),
                tag,
            }
        })
        .collect();

    annotated.extend(
        previous
            .items
            .iter()
            .filter(|prev| !current_ids.contains(prev.id.as_str()))
            .map(|prev| AnnotatedItem {
                item: prev.clone(),
                tag: ChangeTag::Removed,
            }),
    );

    Ok(annotated)
}

/// Tags every line as added. Used for the first revision a client sees.
pub fn annotate_new(order: &Order) -> Vec<AnnotatedItem> {
    order
        .items
        .iter()
        .map(|item| AnnotatedItem {
            item: item.clone(),
            tag: ChangeTag::Added,
        })
        .collect()
}

// =============================================================================
// Helpers
// =============================================================================

fn ensure_same_order(current: &Order, previous: &Order) -> CoreResult<()> {
    if current.id != previous.id {
        return Err(CoreError::OrderMismatch {
            current: current.id.clone(),
            previous: previous.id.clone(),
        });
    }
    Ok(())
}

fn unit_count(items: &[OrderItem]) -> i64 {
    items.iter().map(|i| i.quantity).sum()
}

fn index_by_id(items: &[OrderItem]) -> HashMap<&str, &OrderItem> {
    items.iter().map(|i| (i.id.as_str(), i)).collect()
}

fn line_differs(a: &OrderItem, b: &OrderItem) -> bool {
    a.quantity != b.quantity || a.notes_text() != b.notes_text()
}

/// Summed quantity and sorted notes of all lines of one product.
#[derive(Debug, Default, PartialEq, Eq)]
struct ProductGroup<'a> {
    quantity: i64,
    notes: Vec<&'a str>,
}

fn group_by_product(items: &[OrderItem]) -> BTreeMap<&str, ProductGroup<'_>> {
    let mut groups: BTreeMap<&str, ProductGroup<'_>> = BTreeMap::new();

    for item in items {
        let group = groups.entry(item.product_id.as_str()).or_default();
        group.quantity += item.quantity;
        let notes = item.notes_text().trim();
        if !notes.is_empty() {
            group.notes.push(notes);
        }
    }

    for group in groups.values_mut() {
        group.notes.sort_unstable();
    }

    groups
}

// =============================================================================
// Unit Tests
// =============================================================================

//! Display order assignment for a listing's photos.
//!
//! Survivors keep their order values. New files are appended above the
//! highest surviving order, in selection order.

use crate::error::{Result, SubmissionError};
use crate::models::{AttachmentId, ImageAttachment};

/// One renumbering step that would close a gap in the order sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderMove {
    pub attachment: AttachmentId,
    pub from: u32,
    pub to: u32,
}

/// Orders for `new_count` newly staged files appended after `survivors`.
///
/// With no survivors the files get `0..new_count`. Fails when an order
/// would not fit in a `u32`.
pub fn assign_orders(survivors: &[ImageAttachment], new_count: usize) -> Result<Vec<u32>> {
    if new_count == 0 {
        return Ok(Vec::new());
    }
    let next = match survivors.iter().map(|a| a.display_order).max() {
        Some(max) => max.checked_add(1).ok_or(SubmissionError::OrderOverflow)?,
        None => 0,
    };
    (0..new_count)
        .map(|i| {
            u32::try_from(i)
                .ok()
                .and_then(|i| next.checked_add(i))
                .ok_or(SubmissionError::OrderOverflow)
        })
        .collect()
}

/// Attachments left after dropping the ones marked for removal, sorted by order
pub fn survivors(existing: &[ImageAttachment], removed: &[AttachmentId]) -> Vec<ImageAttachment> {
    let mut kept: Vec<ImageAttachment> = existing
        .iter()
        .filter(|a| !removed.contains(&a.id))
        .cloned()
        .collect();
    kept.sort_by_key(|a| a.display_order);
    kept
}

/// True when the orders are exactly `0..n` in some permutation
pub fn is_contiguous(orders: &[u32]) -> bool {
    let mut sorted = orders.to_vec();
    sorted.sort_unstable();
    sorted.iter().enumerate().all(|(i, &o)| o == i as u32)
}

/// Moves that would compact `attachments` to `0..n` keeping their relative order.
///
/// Ties are broken by attachment id so the plan is deterministic.
pub fn compaction_plan(attachments: &[ImageAttachment]) -> Vec<OrderMove> {
    let mut sorted: Vec<&ImageAttachment> = attachments.iter().collect();
    sorted.sort_by(|a, b| {
        a.display_order
            .cmp(&b.display_order)
            .then_with(|| a.id.0.cmp(&b.id.0))
    });
    sorted
        .into_iter()
        .enumerate()
        .filter(|(i, a)| a.display_order != *i as u32)
        .map(|(i, a)| OrderMove {
            attachment: a.id.clone(),
            from: a.display_order,
            to: i as u32,
        })
        .collect()
}

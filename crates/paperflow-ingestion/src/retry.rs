//! Retry of a single failed item
//!
//! A retry puts the item back to `Ready` and appends it to its batch's queue.
//! It then waits for a worker like any other item, so the batch's concurrency
//! limit still holds. Sibling items are never touched.

use paperflow_core::ItemId;
use tracing::info;

use crate::batch::{BatchShared, RunState};
use crate::item::{ItemEvent, ItemStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    #[error("Unknown item: {0}")]
    UnknownItem(ItemId),

    #[error("Item {item_id} is {status} and cannot be retried")]
    NotRetryable { item_id: ItemId, status: ItemStatus },

    #[error("Batch has been cancelled")]
    BatchCancelled,
}

pub(crate) fn retry(shared: &BatchShared, item_id: ItemId) -> Result<(), RetryError> {
    let slot = shared
        .slot(item_id)
        .ok_or(RetryError::UnknownItem(item_id))?;

    // cancel() takes the queue lock too, so a retry either lands before the
    // cancellation or is refused
    let mut queue = shared.queue.lock();
    if shared.cancel.is_cancelled() {
        return Err(RetryError::BatchCancelled);
    }

    shared
        .apply(item_id, ItemEvent::Retry)
        .map_err(|violation| RetryError::NotRetryable {
            item_id,
            status: violation.status,
        })?;
    let retry_count = slot.read().retry_count();

    shared.queue.push_locked(&mut queue, item_id);
    shared.run_state.send_if_modified(|state| {
        if *state == RunState::Settled {
            *state = RunState::Pending;
            true
        } else {
            false
        }
    });

    info!(
        batch_id = %shared.id,
        item_id = %item_id,
        retry_count,
        "Item re-queued for retry"
    );
    Ok(())
}

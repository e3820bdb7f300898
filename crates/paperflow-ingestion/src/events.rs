//! Batch notifications
//!
//! Workers publish item updates and fresh summaries on a broadcast channel.
//! A subscriber that falls behind loses intermediate events but is handed the
//! current summary, so the aggregate it sees is never stale.

use futures::stream::{self, Stream};
use paperflow_core::ItemId;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::aggregator::{Aggregator, BatchSummary};
use crate::item::{IngestItem, ItemStatus};

/// Per-item notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemUpdate {
    pub item_id: ItemId,
    pub status: ItemStatus,
    pub progress: u8,
    pub retry_count: u32,
}

impl ItemUpdate {
    pub fn of(item: &IngestItem) -> Self {
        Self {
            item_id: item.id,
            status: item.status(),
            progress: item.progress(),
            retry_count: item.retry_count(),
        }
    }

    /// The transient state between a finished transfer and processing
    pub(crate) fn uploaded(item: &IngestItem) -> Self {
        Self {
            item_id: item.id,
            status: ItemStatus::Uploaded,
            progress: 100,
            retry_count: item.retry_count(),
        }
    }
}

/// A completed item the project catalog did not accept
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentFailure {
    pub item_id: ItemId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    Item(ItemUpdate),
    Summary(BatchSummary),
    /// A completed item could not be filed under the project; its state is unchanged
    AssignmentFailed { item_id: ItemId, reason: String },
    /// Every item reached a terminal state
    Settled(BatchSummary),
    Cancelled,
}

/// Sending half, shared by every worker of a batch
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<BatchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: BatchEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self, aggregator: Arc<Aggregator>) -> BatchSubscription {
        BatchSubscription {
            receiver: self.sender.subscribe(),
            aggregator,
        }
    }
}

/// Receiving half handed to callers of `BatchHandle::subscribe`
#[derive(Debug)]
pub struct BatchSubscription {
    receiver: broadcast::Receiver<BatchEvent>,
    aggregator: Arc<Aggregator>,
}

impl BatchSubscription {
    /// Next event, or `None` once the batch has been dropped
    pub async fn next(&mut self) -> Option<BatchEvent> {
        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Subscriber lagged, resynchronising with summary");
                Some(BatchEvent::Summary(self.aggregator.snapshot()))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Current summary without waiting for an event
    pub fn summary(&self) -> BatchSummary {
        self.aggregator.snapshot()
    }

    pub fn into_stream(self) -> impl Stream<Item = BatchEvent> + Send + 'static {
        stream::unfold(self, |mut subscription| async move {
            subscription.next().await.map(|event| (event, subscription))
        })
    }
}

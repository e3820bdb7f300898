//! Work queue and worker pool
//!
//! A batch owns one FIFO queue of item ids and `concurrency_limit` workers.
//! Each worker takes one id at a time and drives that item through upload and
//! processing, so no two workers ever hold the same item. Cancellation stops
//! dequeuing; an item a worker already holds still reaches its next terminal
//! state.

use futures::StreamExt;
use parking_lot::{Mutex, MutexGuard};
use paperflow_core::{ItemId, MediaType};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn, Instrument};

use crate::batch::BatchShared;
use crate::collaborators::{Analysis, ContentHandle, DocumentMetadata, UploadUpdate};
use crate::events::{AssignmentFailure, BatchEvent};
use crate::item::{IllegalTransition, ItemEvent, ItemStatus, Stage, StageError};
use crate::timeout::{timeout_result, TimeoutOrError};

#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pub pending: VecDeque<ItemId>,
    /// Items taken by a worker and not yet released
    pub in_flight: usize,
}

/// FIFO of item ids waiting for a worker
#[derive(Debug, Default)]
pub(crate) struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new(ids: impl IntoIterator<Item = ItemId>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: ids.into_iter().collect(),
                in_flight: 0,
            }),
            notify: Notify::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock()
    }

    /// Append under an already held lock, waking one idle worker
    pub fn push_locked(&self, state: &mut QueueState, item_id: ItemId) {
        state.pending.push_back(item_id);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<ItemId> {
        let mut state = self.state.lock();
        let item_id = state.pending.pop_front()?;
        state.in_flight += 1;
        Some(item_id)
    }

    /// Wait for the next id. The caller owns it until `BatchShared::finish_item`.
    pub async fn next(&self) -> ItemId {
        loop {
            let notified = self.notify.notified();
            if let Some(item_id) = self.try_pop() {
                return item_id;
            }
            notified.await;
        }
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }
}

/// Why a worker stopped driving an item before it completed
enum Interrupt {
    Stage(StageError),
    Contract(IllegalTransition),
}

impl From<IllegalTransition> for Interrupt {
    fn from(violation: IllegalTransition) -> Self {
        Interrupt::Contract(violation)
    }
}

impl From<TimeoutOrError<Interrupt>> for Interrupt {
    fn from(err: TimeoutOrError<Interrupt>) -> Self {
        match err {
            TimeoutOrError::Timeout(t) => Interrupt::Stage(StageError::timeout(t.stage, t.duration)),
            TimeoutOrError::Error(e) => e,
        }
    }
}

/// Spawns and runs the workers of one batch
pub(crate) struct WorkerPool;

impl WorkerPool {
    pub fn spawn(shared: Arc<BatchShared>) {
        for worker in 0..shared.concurrency_limit {
            let span = tracing::debug_span!("worker", batch_id = %shared.id, worker);
            tokio::spawn(Self::work(shared.clone()).instrument(span));
        }
    }

    async fn work(shared: Arc<BatchShared>) {
        loop {
            let item_id = tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => break,
                item_id = shared.queue.next() => item_id,
            };

            if let Err(violation) = drive(&shared, item_id).await {
                shared.fault(violation);
            }
            shared.finish_item();
        }

        debug!(pending = shared.queue.pending(), "Worker stopped");
    }
}

/// Take one item from `Ready` to a terminal state. Stage failures land on the
/// item; only contract violations escape.
async fn drive(shared: &BatchShared, item_id: ItemId) -> Result<(), IllegalTransition> {
    // only ids of this batch are ever queued
    let Some((content, media_type)) =
        shared.read_item(item_id, |item| (item.content().clone(), item.media_type))
    else {
        return Err(IllegalTransition {
            item_id,
            status: ItemStatus::Rejected,
            event: "dequeue",
        });
    };

    shared.apply(item_id, ItemEvent::StartUpload)?;

    let uploaded = timeout_result(&shared.timeouts, Stage::Upload, || {
        upload(shared, item_id, content.clone())
    })
    .await
    .map_err(Interrupt::from);

    match uploaded {
        Ok(()) => {}
        Err(Interrupt::Contract(violation)) => return Err(violation),
        Err(Interrupt::Stage(error)) => {
            warn!(item_id = %item_id, error = %error, "Upload failed");
            return shared.apply(item_id, ItemEvent::UploadError(error));
        }
    }

    shared.publish_uploaded(item_id);
    shared.apply(item_id, ItemEvent::UploadComplete)?;

    let processed = timeout_result(&shared.timeouts, Stage::Processing, || {
        process(shared, item_id, content, media_type)
    })
    .await
    .map_err(StageError::from);

    match processed {
        Ok((metadata, analysis)) => {
            shared.apply(item_id, ItemEvent::ProcessingComplete { metadata, analysis })?;
            assign(shared, item_id).await;
            Ok(())
        }
        Err(error) => {
            warn!(item_id = %item_id, error = %error, "Processing failed");
            shared.apply(item_id, ItemEvent::ProcessingError(error))
        }
    }
}

/// Consume the storage stream, relaying progress onto the item
async fn upload(shared: &BatchShared, item_id: ItemId, content: ContentHandle) -> Result<(), Interrupt> {
    let mut updates = shared.collaborators.storage.upload(item_id, content);

    while let Some(update) = updates.next().await {
        match update {
            Ok(UploadUpdate::Progress(percent)) => {
                shared.apply(item_id, ItemEvent::ProgressTick(percent))?;
            }
            Ok(UploadUpdate::Complete) => return Ok(()),
            Err(e) => return Err(Interrupt::Stage(StageError::from_collaborator(Stage::Upload, e))),
        }
    }

    Err(Interrupt::Stage(StageError::interrupted(Stage::Upload)))
}

/// Metadata extraction, then analysis of the extracted text
async fn process(
    shared: &BatchShared,
    item_id: ItemId,
    content: ContentHandle,
    media_type: MediaType,
) -> Result<(DocumentMetadata, Analysis), StageError> {
    let to_stage_error = |e| StageError::from_collaborator(Stage::Processing, e);

    let extracted = shared
        .collaborators
        .metadata
        .extract(item_id, content, media_type)
        .await
        .map_err(to_stage_error)?;

    let analysis = shared
        .collaborators
        .analysis
        .analyze(item_id, &extracted.text)
        .await
        .map_err(to_stage_error)?;

    Ok((extracted.metadata, analysis))
}

/// File a completed item under the batch's project. Failure leaves the item
/// `Completed`; it is recorded on the batch and published as an event.
async fn assign(shared: &BatchShared, item_id: ItemId) {
    let budget = shared.timeouts.for_stage(Stage::Processing);
    let outcome = tokio::time::timeout(
        budget,
        shared
            .collaborators
            .catalog
            .assign_to_project(item_id, shared.project_id.clone()),
    )
    .await;

    let reason = match outcome {
        Ok(Ok(())) => {
            debug!(item_id = %item_id, project_id = %shared.project_id, "Item assigned to project");
            return;
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("assignment timed out after {}ms", budget.as_millis()),
    };

    warn!(
        item_id = %item_id,
        project_id = %shared.project_id,
        reason = %reason,
        "Project assignment failed"
    );
    shared.assignment_failures.lock().push(AssignmentFailure {
        item_id,
        reason: reason.clone(),
    });
    shared
        .events
        .publish(BatchEvent::AssignmentFailed { item_id, reason });
}

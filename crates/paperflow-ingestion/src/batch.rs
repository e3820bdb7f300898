//! Batch creation and the caller-facing handle
//!
//! [`IngestionPipeline::create_batch`] validates a submission and returns a
//! [`BatchHandle`]. Nothing runs until [`BatchHandle::run`] is called, so a
//! caller can subscribe first and observe every transition.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use paperflow_core::{BatchId, IngestConfig, ItemId, PipelineSettings, ProjectId, ValidationPolicy};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, info};

use crate::aggregator::{Aggregator, BatchSummary};
use crate::collaborators::{Collaborators, MetadataEdit};
use crate::events::{AssignmentFailure, BatchEvent, BatchSubscription, EventBus, ItemUpdate};
use crate::item::{IllegalTransition, IngestItem, ItemEvent, ItemStatus};
use crate::retry::{self, RetryError};
use crate::scheduler::{WorkQueue, WorkerPool};
use crate::timeout::StageTimeouts;
use crate::validation::{admit, CandidateFile, Rejection};
use crate::{IngestionError, Result};

/// Entry point: owns the collaborators and the pipeline settings
#[derive(Debug, Clone)]
pub struct IngestionPipeline {
    collaborators: Collaborators,
    settings: PipelineSettings,
    timeouts: StageTimeouts,
}

impl IngestionPipeline {
    pub fn new(collaborators: Collaborators, settings: PipelineSettings) -> Self {
        let timeouts = StageTimeouts::from_settings(&settings);
        Self {
            collaborators,
            settings,
            timeouts,
        }
    }

    pub fn from_config(collaborators: Collaborators, config: &IngestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(collaborators, config.pipeline.clone()))
    }

    /// Override the stage budgets, e.g. with sub-second values
    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Validate a submission and build its batch. Admitted items start `Ready`.
    pub fn create_batch(
        &self,
        candidates: Vec<CandidateFile>,
        policy: &ValidationPolicy,
        project_id: impl Into<ProjectId>,
        concurrency_limit: usize,
    ) -> Result<BatchHandle> {
        let project_id = project_id.into();
        if project_id.is_blank() {
            return Err(IngestionError::MissingProject);
        }
        if concurrency_limit == 0 {
            return Err(IngestionError::InvalidConcurrency);
        }

        let candidate_count = candidates.len();
        let admission = admit(candidates, &[], policy);
        let aggregator = Arc::new(Aggregator::new(&admission.admitted, admission.rejected.len()));

        let index = admission
            .admitted
            .iter()
            .enumerate()
            .map(|(position, item)| (item.id, position))
            .collect();
        let queue = WorkQueue::new(admission.admitted.iter().map(|item| item.id));
        let items = admission.admitted.into_iter().map(RwLock::new).collect();

        let summary = aggregator.snapshot();
        let (run_state, _) = watch::channel(if summary.is_settled() {
            RunState::Settled
        } else {
            RunState::Pending
        });

        let shared = Arc::new(BatchShared {
            id: BatchId::new(),
            project_id,
            created_at: Utc::now(),
            concurrency_limit,
            items,
            index,
            rejections: admission.rejected,
            aggregator,
            queue,
            events: EventBus::new(self.settings.event_capacity),
            cancel: CancellationToken::new(),
            collaborators: self.collaborators.clone(),
            timeouts: self.timeouts,
            run_state,
            fault: Mutex::new(None),
            assignment_failures: Mutex::new(Vec::new()),
        });

        info!(
            batch_id = %shared.id,
            project_id = %shared.project_id,
            candidates = candidate_count,
            admitted = summary.admitted(),
            rejected = summary.rejected,
            concurrency_limit,
            "Batch created"
        );

        Ok(BatchHandle {
            inner: Arc::new(HandleInner {
                _cancel_on_drop: shared.cancel.clone().drop_guard(),
                started: AtomicBool::new(false),
                shared,
            }),
        })
    }
}

/// Where a batch stands as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
    /// Some item is not terminal yet
    Pending,
    /// Every item is terminal and nothing is queued or in flight
    Settled,
    /// A contract violation stopped the batch
    Faulted,
}

/// State shared by the handle, the workers and the retry coordinator.
///
/// Lock order: queue, then item, then aggregator.
pub(crate) struct BatchShared {
    pub id: BatchId,
    pub project_id: ProjectId,
    pub created_at: DateTime<Utc>,
    pub concurrency_limit: usize,
    pub items: Vec<RwLock<IngestItem>>,
    pub index: HashMap<ItemId, usize>,
    pub rejections: Vec<Rejection>,
    pub aggregator: Arc<Aggregator>,
    pub queue: WorkQueue,
    pub events: EventBus,
    pub cancel: CancellationToken,
    pub collaborators: Collaborators,
    pub timeouts: StageTimeouts,
    pub run_state: watch::Sender<RunState>,
    pub fault: Mutex<Option<IllegalTransition>>,
    pub assignment_failures: Mutex<Vec<AssignmentFailure>>,
}

impl BatchShared {
    pub fn slot(&self, item_id: ItemId) -> Option<&RwLock<IngestItem>> {
        self.index.get(&item_id).map(|&position| &self.items[position])
    }

    /// Run `f` against an item under its read lock
    pub fn read_item<T>(&self, item_id: ItemId, f: impl FnOnce(&IngestItem) -> T) -> Option<T> {
        self.slot(item_id).map(|slot| f(&*slot.read()))
    }

    /// Apply one event to an item, fold the status change into the summary and
    /// notify subscribers. Events for one item are published in the order they
    /// were applied.
    pub fn apply(&self, item_id: ItemId, event: ItemEvent) -> std::result::Result<(), IllegalTransition> {
        let Some(slot) = self.slot(item_id) else {
            return Err(IllegalTransition {
                item_id,
                status: ItemStatus::Rejected,
                event: event.name(),
            });
        };

        let mut item = slot.write();
        let transition = item.apply(event)?;

        self.events.publish(BatchEvent::Item(ItemUpdate::of(&item)));
        if let Some(transition) = transition {
            let summary = self.aggregator.apply(&transition);
            self.events.publish(BatchEvent::Summary(summary));
        }
        Ok(())
    }

    /// Announce the instantaneous `Uploaded` state
    pub fn publish_uploaded(&self, item_id: ItemId) {
        if let Some(update) = self.read_item(item_id, ItemUpdate::uploaded) {
            self.events.publish(BatchEvent::Item(update));
        }
    }

    /// Called by a worker once it lets go of an item
    pub fn finish_item(&self) {
        let mut queue = self.queue.lock();
        queue.in_flight = queue.in_flight.saturating_sub(1);

        if queue.in_flight > 0 || !queue.pending.is_empty() {
            return;
        }

        let summary = self.aggregator.snapshot();
        if !summary.is_settled() {
            return;
        }

        let settled = self.run_state.send_if_modified(|state| {
            if *state == RunState::Pending {
                *state = RunState::Settled;
                true
            } else {
                false
            }
        });
        if settled {
            info!(
                batch_id = %self.id,
                completed = summary.completed,
                failed = summary.failed,
                rejected = summary.rejected,
                "Batch settled"
            );
            self.events.publish(BatchEvent::Settled(summary));
        }
    }

    /// Record a contract violation and stop the batch
    pub fn fault(&self, violation: IllegalTransition) {
        error!(
            batch_id = %self.id,
            item_id = %violation.item_id,
            status = %violation.status,
            event = violation.event,
            "Illegal transition, stopping batch"
        );

        self.fault.lock().get_or_insert(violation);
        self.run_state.send_replace(RunState::Faulted);
        let _queue = self.queue.lock();
        self.cancel.cancel();
    }
}

struct HandleInner {
    shared: Arc<BatchShared>,
    started: AtomicBool,
    _cancel_on_drop: DropGuard,
}

/// Caller-facing handle to a batch. Clones share the same batch; dropping the
/// last clone cancels it.
#[derive(Clone)]
pub struct BatchHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for BatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchHandle")
            .field("id", &self.shared().id)
            .field("project_id", &self.shared().project_id)
            .finish_non_exhaustive()
    }
}

impl BatchHandle {
    fn shared(&self) -> &Arc<BatchShared> {
        &self.inner.shared
    }

    pub fn id(&self) -> BatchId {
        self.shared().id
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.shared().project_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.shared().created_at
    }

    pub fn concurrency_limit(&self) -> usize {
        self.shared().concurrency_limit
    }

    /// Spawn the worker pool. Later calls do nothing. Must be called from
    /// within a tokio runtime.
    pub fn run(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        WorkerPool::spawn(self.shared().clone());
    }

    /// Subscribe, then start the batch
    pub fn start(&self) -> BatchSubscription {
        let subscription = self.subscribe();
        self.run();
        subscription
    }

    pub fn subscribe(&self) -> BatchSubscription {
        self.shared()
            .events
            .subscribe(self.shared().aggregator.clone())
    }

    /// Put one failed item back in the queue
    pub fn retry(&self, item_id: ItemId) -> std::result::Result<(), RetryError> {
        retry::retry(self.shared(), item_id)
    }

    /// Stop dequeuing. Items already in flight finish their current stage;
    /// items still `Ready` stay `Ready`.
    pub fn cancel(&self) {
        let shared = self.shared();
        {
            // serialises with retry(), which checks the token under this lock
            let _queue = shared.queue.lock();
            if shared.cancel.is_cancelled() {
                return;
            }
            shared.cancel.cancel();
        }
        info!(batch_id = %shared.id, "Batch cancelled");
        shared.events.publish(BatchEvent::Cancelled);
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared().cancel.is_cancelled()
    }

    pub fn summary(&self) -> BatchSummary {
        self.shared().aggregator.snapshot()
    }

    /// Snapshot of every admitted item in submission order
    pub fn items(&self) -> Vec<IngestItem> {
        self.shared()
            .items
            .iter()
            .map(|slot| slot.read().clone())
            .collect()
    }

    pub fn item(&self, item_id: ItemId) -> Option<IngestItem> {
        self.shared().read_item(item_id, IngestItem::clone)
    }

    pub fn rejections(&self) -> &[Rejection] {
        &self.shared().rejections
    }

    /// Completed items the project catalog did not accept, in the order the
    /// catalog answered
    pub fn assignment_failures(&self) -> Vec<AssignmentFailure> {
        self.shared().assignment_failures.lock().clone()
    }

    /// Edit the extracted metadata of a completed item
    pub fn update_metadata(&self, item_id: ItemId, edit: MetadataEdit) -> Result<IngestItem> {
        let shared = self.shared();
        let slot = shared
            .slot(item_id)
            .ok_or(IngestionError::UnknownItem(item_id))?;

        let mut item = slot.write();
        let status = item.status();
        let metadata = item
            .metadata_mut()
            .ok_or(IngestionError::NotCompleted { item_id, status })?;
        edit.apply_to(metadata);

        shared.events.publish(BatchEvent::Item(ItemUpdate::of(&item)));
        Ok(item.clone())
    }

    /// Resolves once every item is terminal and nothing is queued or in
    /// flight. Never resolves for a cancelled batch with items left `Ready`.
    pub async fn done(&self) -> Result<BatchSummary> {
        let mut run_state = self.shared().run_state.subscribe();
        loop {
            match *run_state.borrow_and_update() {
                RunState::Settled => return Ok(self.summary()),
                RunState::Faulted => {
                    if let Some(violation) = self.shared().fault.lock().clone() {
                        return Err(violation.into());
                    }
                }
                RunState::Pending => {}
            }
            // The sender lives as long as `self`
            if run_state.changed().await.is_err() {
                return Ok(self.summary());
            }
        }
    }
}

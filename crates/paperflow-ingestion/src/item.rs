//! Per-item lifecycle
//!
//! An [`IngestItem`] owns its [`ItemState`], a tagged union whose variants carry
//! exactly the payload valid for that state: progress while a stage runs, the
//! extracted record once completed, the stage error once failed. Transitions go
//! through [`next_state`], a pure function; any pairing not listed there is an
//! [`IllegalTransition`].

use chrono::{DateTime, Utc};
use paperflow_core::{ItemId, MediaType};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::collaborators::{Analysis, CollaboratorError, ContentHandle, DocumentMetadata};

/// Flat discriminant of an item's state, used for counting and notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Ready,
    Uploading,
    /// Instantaneous: announced when the transfer completes, never stored
    Uploaded,
    Processing,
    Completed,
    UploadFailed,
    ProcessingFailed,
    /// Candidates turned away by validation; they never become items
    Rejected,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Completed
                | ItemStatus::UploadFailed
                | ItemStatus::ProcessingFailed
                | ItemStatus::Rejected
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ItemStatus::UploadFailed | ItemStatus::ProcessingFailed)
    }

    pub fn is_failed(&self) -> bool {
        self.is_retryable()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Ready => "ready",
            ItemStatus::Uploading => "uploading",
            ItemStatus::Uploaded => "uploaded",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::UploadFailed => "upload_failed",
            ItemStatus::ProcessingFailed => "processing_failed",
            ItemStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The stage an item was in when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Upload,
    Processing,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Upload => write!(f, "upload"),
            Stage::Processing => write!(f, "processing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// The stage exceeded its time budget, or the collaborator reported one
    Timeout { after_ms: Option<u64> },
    /// The collaborator reported a failure
    Backend { message: String },
    /// The upload stream ended without reporting completion
    Interrupted,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Timeout { after_ms: Some(ms) } => write!(f, "timed out after {}ms", ms),
            FailureKind::Timeout { after_ms: None } => write!(f, "timed out"),
            FailureKind::Backend { message } => f.write_str(message),
            FailureKind::Interrupted => write!(f, "transfer ended before completion"),
        }
    }
}

/// Why a stage failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{stage} failed: {kind}")]
pub struct StageError {
    pub stage: Stage,
    pub kind: FailureKind,
}

impl StageError {
    pub fn timeout(stage: Stage, after: Duration) -> Self {
        Self {
            stage,
            kind: FailureKind::Timeout {
                after_ms: Some(after.as_millis() as u64),
            },
        }
    }

    pub fn interrupted(stage: Stage) -> Self {
        Self {
            stage,
            kind: FailureKind::Interrupted,
        }
    }

    pub fn from_collaborator(stage: Stage, error: CollaboratorError) -> Self {
        let kind = match error {
            CollaboratorError::Timeout => FailureKind::Timeout { after_ms: None },
            CollaboratorError::Failed(message) => FailureKind::Backend { message },
        };
        Self { stage, kind }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, FailureKind::Timeout { .. })
    }
}

/// Lifecycle state with its state-specific payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemState {
    Ready,
    Uploading {
        progress: u8,
    },
    Processing {
        progress: u8,
    },
    Completed {
        metadata: DocumentMetadata,
        analysis: Analysis,
    },
    UploadFailed {
        error: StageError,
    },
    ProcessingFailed {
        error: StageError,
    },
}

impl ItemState {
    pub fn status(&self) -> ItemStatus {
        match self {
            ItemState::Ready => ItemStatus::Ready,
            ItemState::Uploading { .. } => ItemStatus::Uploading,
            ItemState::Processing { .. } => ItemStatus::Processing,
            ItemState::Completed { .. } => ItemStatus::Completed,
            ItemState::UploadFailed { .. } => ItemStatus::UploadFailed,
            ItemState::ProcessingFailed { .. } => ItemStatus::ProcessingFailed,
        }
    }

    pub fn progress(&self) -> u8 {
        match self {
            ItemState::Uploading { progress } | ItemState::Processing { progress } => *progress,
            ItemState::Completed { .. } => 100,
            _ => 0,
        }
    }
}

/// Inputs to the item state machine
#[derive(Debug, Clone, PartialEq)]
pub enum ItemEvent {
    StartUpload,
    ProgressTick(u8),
    UploadComplete,
    UploadError(StageError),
    ProcessingComplete {
        metadata: DocumentMetadata,
        analysis: Analysis,
    },
    ProcessingError(StageError),
    Retry,
}

impl ItemEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ItemEvent::StartUpload => "start_upload",
            ItemEvent::ProgressTick(_) => "progress_tick",
            ItemEvent::UploadComplete => "upload_complete",
            ItemEvent::UploadError(_) => "upload_error",
            ItemEvent::ProcessingComplete { .. } => "processing_complete",
            ItemEvent::ProcessingError(_) => "processing_error",
            ItemEvent::Retry => "retry",
        }
    }
}

/// An event delivered to a state that does not accept it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Illegal transition for item {item_id}: {event} while {status}")]
pub struct IllegalTransition {
    pub item_id: ItemId,
    pub status: ItemStatus,
    pub event: &'static str,
}

/// The (state, event) -> state' table
pub fn next_state(state: &ItemState, event: ItemEvent) -> Option<ItemState> {
    let next = match (state, event) {
        (ItemState::Ready, ItemEvent::StartUpload) => ItemState::Uploading { progress: 0 },
        (ItemState::Uploading { progress }, ItemEvent::ProgressTick(p)) => ItemState::Uploading {
            progress: (*progress).max(p.min(100)),
        },
        (ItemState::Uploading { .. }, ItemEvent::UploadComplete) => {
            ItemState::Processing { progress: 0 }
        }
        (ItemState::Uploading { .. }, ItemEvent::UploadError(error)) => {
            ItemState::UploadFailed { error }
        }
        (ItemState::Processing { .. }, ItemEvent::ProcessingComplete { metadata, analysis }) => {
            ItemState::Completed { metadata, analysis }
        }
        (ItemState::Processing { .. }, ItemEvent::ProcessingError(error)) => {
            ItemState::ProcessingFailed { error }
        }
        // back in the queue; a worker starts the upload when it takes the item
        (ItemState::UploadFailed { .. } | ItemState::ProcessingFailed { .. }, ItemEvent::Retry) => {
            ItemState::Ready
        }
        _ => return None,
    };
    Some(next)
}

/// A change of status, identified by the item and its per-item sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub item_id: ItemId,
    pub seq: u64,
    pub from: ItemStatus,
    pub to: ItemStatus,
}

/// An admitted document moving through the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct IngestItem {
    pub id: ItemId,
    pub name: String,
    pub size_bytes: u64,
    pub media_type: MediaType,
    pub admitted_at: DateTime<Utc>,
    state: ItemState,
    retry_count: u32,
    transitions: u64,
    #[serde(skip)]
    content: ContentHandle,
}

impl IngestItem {
    pub fn new(
        name: impl Into<String>,
        size_bytes: u64,
        media_type: MediaType,
        content: ContentHandle,
    ) -> Self {
        Self {
            id: ItemId::new(),
            name: name.into(),
            size_bytes,
            media_type,
            admitted_at: Utc::now(),
            state: ItemState::Ready,
            retry_count: 0,
            transitions: 0,
            content,
        }
    }

    pub fn state(&self) -> &ItemState {
        &self.state
    }

    pub fn status(&self) -> ItemStatus {
        self.state.status()
    }

    pub fn progress(&self) -> u8 {
        self.state.progress()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn content(&self) -> &ContentHandle {
        &self.content
    }

    pub fn metadata(&self) -> Option<&DocumentMetadata> {
        match &self.state {
            ItemState::Completed { metadata, .. } => Some(metadata),
            _ => None,
        }
    }

    pub(crate) fn metadata_mut(&mut self) -> Option<&mut DocumentMetadata> {
        match &mut self.state {
            ItemState::Completed { metadata, .. } => Some(metadata),
            _ => None,
        }
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        match &self.state {
            ItemState::Completed { analysis, .. } => Some(analysis),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&StageError> {
        match &self.state {
            ItemState::UploadFailed { error } | ItemState::ProcessingFailed { error } => {
                Some(error)
            }
            _ => None,
        }
    }

    /// Apply an event. Returns the status change, or `None` for progress-only
    /// events. The item is left untouched when the event is illegal.
    pub fn apply(&mut self, event: ItemEvent) -> Result<Option<Transition>, IllegalTransition> {
        let from = self.status();
        let is_retry = matches!(event, ItemEvent::Retry);
        let event_name = event.name();

        let next = next_state(&self.state, event).ok_or(IllegalTransition {
            item_id: self.id,
            status: from,
            event: event_name,
        })?;

        self.state = next;
        if is_retry {
            self.retry_count += 1;
        }

        let to = self.status();
        if from == to {
            return Ok(None);
        }

        self.transitions += 1;
        Ok(Some(Transition {
            item_id: self.id,
            seq: self.transitions,
            from,
            to,
        }))
    }
}

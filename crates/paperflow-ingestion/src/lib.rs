//! Batch document ingestion for Paperflow
//!
//! A submission of candidate files is validated, then the admitted items are
//! driven through upload and processing by a bounded worker pool while a
//! running summary tracks the batch.
//!
//! # Features
//!
//! - Ordered admission rules (type, size, duplicate, batch ceiling)
//! - Per-item state machine with payload-carrying states
//! - Bounded concurrency with advisory cancellation
//! - Incremental, idempotent batch counters
//! - Retry of a single failed item without touching its siblings
//! - Broadcast subscription to item and summary updates

pub mod aggregator;
pub mod batch;
pub mod collaborators;
pub mod events;
pub mod item;
pub mod retry;
pub mod scheduler;
pub mod timeout;
pub mod validation;

// Re-exports
pub use aggregator::{Aggregator, BatchSummary};
pub use batch::{BatchHandle, IngestionPipeline};
pub use collaborators::{
    Analysis, AnalysisService, CollaboratorError, Collaborators, Confidence, ContentHandle,
    DocumentMetadata, ExtractedDocument, MetadataEdit, MetadataService, ProjectCatalog,
    StorageBackend, UploadStream, UploadUpdate,
};
pub use events::{AssignmentFailure, BatchEvent, BatchSubscription, ItemUpdate};
pub use item::{
    FailureKind, IllegalTransition, IngestItem, ItemEvent, ItemState, ItemStatus, Stage,
    StageError, Transition,
};
pub use retry::RetryError;
pub use timeout::{StageTimeouts, TimeoutError, TimeoutOrError};
pub use validation::{admit, Admission, CandidateFile, Rejection, RejectionReason};

use paperflow_core::ItemId;

/// Error types for ingestion operations
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("A project id is required")]
    MissingProject,

    #[error("Concurrency limit must be at least 1")]
    InvalidConcurrency,

    #[error("Unknown item: {0}")]
    UnknownItem(ItemId),

    #[error("Item {item_id} is {status}, only completed items can be edited")]
    NotCompleted { item_id: ItemId, status: ItemStatus },

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    #[error(transparent)]
    Retry(#[from] RetryError),

    #[error("Configuration error: {0}")]
    Config(#[from] paperflow_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IngestionError>;

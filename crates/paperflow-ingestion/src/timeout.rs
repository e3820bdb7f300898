//! Stage time budgets
//!
//! Each collaborator call runs under the budget of its stage. Running out of
//! time is reported the same way as a collaborator failure so the item lands
//! in the matching failed state.

use paperflow_core::PipelineSettings;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::item::{Stage, StageError};

/// Per-stage time budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub upload: Duration,
    pub processing: Duration,
}

impl StageTimeouts {
    pub fn new(upload: Duration, processing: Duration) -> Self {
        Self { upload, processing }
    }

    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(settings.upload_timeout(), settings.processing_timeout())
    }

    pub fn for_stage(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Upload => self.upload,
            Stage::Processing => self.processing,
        }
    }
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self::from_settings(&PipelineSettings::default())
    }
}

/// A stage ran past its budget
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Stage '{stage}' timed out after {duration:?}")]
pub struct TimeoutError {
    pub stage: Stage,
    pub duration: Duration,
}

/// Either a timeout or the operation's own error
#[derive(Debug)]
pub enum TimeoutOrError<E> {
    Timeout(TimeoutError),
    Error(E),
}

impl<E: std::fmt::Display> std::fmt::Display for TimeoutOrError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutOrError::Timeout(e) => write!(f, "{}", e),
            TimeoutOrError::Error(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for TimeoutOrError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TimeoutOrError::Timeout(e) => Some(e),
            TimeoutOrError::Error(e) => Some(e),
        }
    }
}

impl From<TimeoutOrError<StageError>> for StageError {
    fn from(err: TimeoutOrError<StageError>) -> Self {
        match err {
            TimeoutOrError::Timeout(t) => StageError::timeout(t.stage, t.duration),
            TimeoutOrError::Error(e) => e,
        }
    }
}

/// Run a fallible stage future under the stage's budget
pub async fn timeout_result<F, Fut, T, E>(
    timeouts: &StageTimeouts,
    stage: Stage,
    operation: F,
) -> Result<T, TimeoutOrError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let duration = timeouts.for_stage(stage);
    match tokio::time::timeout(duration, operation()).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(TimeoutOrError::Error(e)),
        Err(_) => {
            warn!(
                stage = %stage,
                timeout_ms = duration.as_millis() as u64,
                "Stage timed out"
            );
            Err(TimeoutOrError::Timeout(TimeoutError { stage, duration }))
        }
    }
}

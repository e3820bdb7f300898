//! Shared identifiers, media types and configuration for Paperflow.

pub mod config;
pub mod types;

pub use config::{IngestConfig, OverflowPolicy, PipelineSettings, ValidationPolicy};
pub use types::{format_size, BatchId, ItemId, MediaType, ProjectId};

/// Errors raised while loading or checking configuration
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::types::MediaType;
use crate::{CoreError, Result};

const ENV_PREFIX: &str = "PAPERFLOW";

/// Top-level ingestion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    pub validation: ValidationPolicy,
    pub pipeline: PipelineSettings,
}

impl IngestConfig {
    /// Load configuration from defaults and `PAPERFLOW__*` environment variables
    pub fn load() -> Result<Self> {
        Self::load_with(None)
    }

    /// Load configuration from a TOML/YAML/JSON file with environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with(Some(path.as_ref()))
    }

    fn load_with(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("validation.allowed_types")
                .try_parsing(true),
        );

        let config: IngestConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.validation.max_items_per_batch == 0 {
            return Err(CoreError::Invalid(
                "validation.max_items_per_batch must be at least 1".to_string(),
            ));
        }
        if self.pipeline.concurrency_limit == 0 {
            return Err(CoreError::Invalid(
                "pipeline.concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.pipeline.event_capacity == 0 {
            return Err(CoreError::Invalid(
                "pipeline.event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// What to do when a submission does not fit under the batch ceiling
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Admit candidates in submission order until the ceiling is reached
    #[default]
    PartialAdmit,
    /// Reject every otherwise-valid candidate if they do not all fit
    RejectSubmission,
}

/// Rules applied to candidates before they enter a batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationPolicy {
    pub allowed_types: Vec<MediaType>,
    pub max_file_size: u64,
    pub max_items_per_batch: usize,
    pub overflow: OverflowPolicy,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            allowed_types: MediaType::DOCUMENTS.to_vec(),
            max_file_size: default_max_file_size(),
            max_items_per_batch: default_max_items_per_batch(),
            overflow: OverflowPolicy::default(),
        }
    }
}

impl ValidationPolicy {
    pub fn with_allowed_types(mut self, types: impl IntoIterator<Item = MediaType>) -> Self {
        self.allowed_types = types.into_iter().collect();
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_max_items(mut self, max: usize) -> Self {
        self.max_items_per_batch = max;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn allows(&self, media_type: MediaType) -> bool {
        self.allowed_types.contains(&media_type)
    }
}

fn default_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

fn default_max_items_per_batch() -> usize {
    20
}

/// Worker pool and stage settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub concurrency_limit: usize,
    pub upload_timeout_seconds: u64,
    pub processing_timeout_seconds: u64,
    /// Buffered events per subscriber before slow subscribers start lagging
    pub event_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            upload_timeout_seconds: 120,
            processing_timeout_seconds: 60,
            event_capacity: 256,
        }
    }
}

impl PipelineSettings {
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout_seconds = timeout.as_secs();
        self
    }

    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout_seconds = timeout.as_secs();
        self
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_seconds)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_seconds)
    }
}

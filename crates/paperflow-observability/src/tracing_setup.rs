//! Subscriber setup shared by the Paperflow binaries

use crate::{ObservabilityError, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Logging options. Logs always go to stderr; stdout belongs to command output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Reported in the startup line
    pub service_name: String,
    pub service_version: String,
    /// Filter directives used when `RUST_LOG` is not set, e.g. `warn` or
    /// `warn,paperflow_ingestion=debug`
    pub log_level: String,
    /// One JSON object per line instead of the human format
    pub json_logs: bool,
    /// Emit a line when a span closes, with its busy and idle time
    pub span_events: bool,
    pub colored_output: bool,
    pub show_target: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "paperflow".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            span_events: false,
            colored_output: true,
            show_target: true,
        }
    }
}

impl TracingConfig {
    pub fn with_service_name(mut self, name: &str) -> Self {
        self.service_name = name.to_string();
        self
    }

    pub fn with_log_level(mut self, directives: &str) -> Self {
        self.log_level = directives.to_string();
        self
    }

    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_colors(mut self, colored: bool) -> Self {
        self.colored_output = colored;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.default_filter().map(|_| ())
    }

    fn default_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(&self.log_level).map_err(|e| {
            ObservabilityError::Configuration(format!(
                "Invalid log filter '{}': {}",
                self.log_level, e
            ))
        })
    }

    /// `RUST_LOG` wins over the configured directives
    fn filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => self.default_filter(),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &TracingConfig) -> Result<()> {
    let filter = config.filter()?;

    let span_events = if config.span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let output = if config.json_logs {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(config.show_target)
            .with_span_events(span_events)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(config.show_target)
            .with_ansi(config.colored_output)
            .with_span_events(span_events)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init()
        .map_err(|e| ObservabilityError::TracingInit(e.to_string()))?;

    tracing::debug!(
        service = %config.service_name,
        version = %config.service_version,
        json = config.json_logs,
        "Tracing initialized"
    );

    Ok(())
}

//! Terminal and machine-readable output

use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use paperflow_ingestion::{ItemStatus, RejectionReason};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Tables and progress bars
    Text,
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn is_structured(self) -> bool {
        self != OutputFormat::Text
    }
}

/// Render a report for the structured formats; text falls back to JSON
pub fn render<T: Serialize>(value: &T, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Yaml => Ok(serde_yaml::to_string(value)?),
        OutputFormat::Json | OutputFormat::Text => Ok(serde_json::to_string_pretty(value)?),
    }
}

pub fn success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn warning(message: &str) {
    println!("{} {}", "⚠".yellow(), message);
}

pub fn key_value(key: &str, value: &str) {
    println!("{:>12} {}", format!("{}:", key).bold(), value);
}

pub fn dimmed(message: &str) {
    println!("{}", message.dimmed());
}

pub fn section(title: &str) {
    println!();
    println!("{}", title.bold().underline());
}

/// Item status colored by outcome
pub fn status_label(status: ItemStatus) -> ColoredString {
    let label = status.as_str();
    if status.is_failed() || status == ItemStatus::Rejected {
        label.red()
    } else if status == ItemStatus::Completed {
        label.green()
    } else if status == ItemStatus::Ready {
        label.dimmed()
    } else {
        label.cyan()
    }
}

pub fn reason_label(reason: RejectionReason) -> ColoredString {
    reason.to_string().yellow()
}

pub fn format_duration(ms: u64) -> String {
    match ms {
        0..=999 => format!("{}ms", ms),
        1_000..=59_999 => format!("{:.1}s", ms as f64 / 1000.0),
        _ => format!("{}m {}s", ms / 60_000, (ms % 60_000) / 1000),
    }
}

/// Shorten to `max_chars` characters, marking the cut with `...`
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}

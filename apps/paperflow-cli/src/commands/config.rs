//! Configuration management commands

use crate::ConfigCommands;
use anyhow::Result;
use paperflow_core::{format_size, IngestConfig};
use std::path::Path;

use super::load_config;
use crate::output::{self, OutputFormat};

pub fn run(cmd: ConfigCommands, config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Show => show_config(config_path, format),
    }
}

fn show_config(config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let config = load_config(config_path)?;

    if format.is_structured() {
        println!("{}", output::render(&config, format)?);
    } else {
        print_config(&config, config_path)?;
    }

    Ok(())
}

fn print_config(config: &IngestConfig, config_path: Option<&Path>) -> Result<()> {
    output::section("Configuration");
    output::key_value(
        "Source",
        &config_path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "defaults + environment".to_string()),
    );

    let allowed: Vec<&str> = config
        .validation
        .allowed_types
        .iter()
        .map(|t| t.label())
        .collect();

    output::section("Validation");
    output::key_value("Allowed types", &allowed.join(", "));
    output::key_value("Max file size", &format_size(config.validation.max_file_size));
    output::key_value(
        "Max items per batch",
        &config.validation.max_items_per_batch.to_string(),
    );
    output::key_value("Overflow", &format!("{:?}", config.validation.overflow));

    output::section("Pipeline");
    output::key_value(
        "Concurrency limit",
        &config.pipeline.concurrency_limit.to_string(),
    );
    output::key_value(
        "Upload timeout",
        &output::format_duration(config.pipeline.upload_timeout().as_millis() as u64),
    );
    output::key_value(
        "Processing timeout",
        &output::format_duration(config.pipeline.processing_timeout().as_millis() as u64),
    );
    output::key_value("Event capacity", &config.pipeline.event_capacity.to_string());

    println!();
    output::dimmed("As TOML:");
    println!("{}", toml::to_string_pretty(config)?);

    Ok(())
}

//! Dry-run of the admission rules

use anyhow::Result;
use colored::Colorize;
use paperflow_core::format_size;
use paperflow_ingestion::{admit, Rejection};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};

use super::{describe_candidates, load_config};
use crate::output::{self, OutputFormat};

#[derive(Debug, Serialize)]
struct AdmittedFile {
    name: String,
    media_type: String,
    size_bytes: u64,
}

#[derive(Debug, Serialize)]
struct ValidationReport {
    admitted: Vec<AdmittedFile>,
    rejected: Vec<Rejection>,
}

pub async fn run(paths: &[PathBuf], config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let config = load_config(config_path)?;
    let candidates = describe_candidates(paths).await?;
    let admission = admit(candidates, &[], &config.validation);

    let report = ValidationReport {
        admitted: admission
            .admitted
            .iter()
            .map(|item| AdmittedFile {
                name: item.name.clone(),
                media_type: item.media_type.label().to_string(),
                size_bytes: item.size_bytes,
            })
            .collect(),
        rejected: admission.rejected,
    };

    if format.is_structured() {
        println!("{}", output::render(&report, format)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &ValidationReport) {
    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Type")]
        media_type: String,
        #[tabled(rename = "Size")]
        size: String,
        #[tabled(rename = "Result")]
        result: String,
    }

    let admitted = report.admitted.iter().map(|file| Row {
        name: output::truncate(&file.name, 40),
        media_type: file.media_type.clone(),
        size: format_size(file.size_bytes),
        result: "admitted".to_string(),
    });
    let rejected = report.rejected.iter().map(|rejection| Row {
        name: output::truncate(&rejection.name, 40),
        media_type: rejection.media_type.label().to_string(),
        size: format_size(rejection.size_bytes),
        result: rejection.reason.to_string(),
    });
    let rows: Vec<Row> = admitted.chain(rejected).collect();

    if rows.is_empty() {
        output::dimmed("No files found.");
        return;
    }

    println!("{}", Table::new(rows));
    println!();

    for rejection in &report.rejected {
        println!(
            "  {} {}: {}",
            output::reason_label(rejection.reason),
            rejection.name,
            rejection.detail.dimmed()
        );
    }

    let summary = format!(
        "{} admitted, {} rejected",
        report.admitted.len(),
        report.rejected.len()
    );
    if report.rejected.is_empty() {
        output::success(&summary);
    } else {
        output::warning(&summary);
    }
}

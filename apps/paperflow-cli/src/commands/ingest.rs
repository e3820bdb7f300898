//! Batch ingestion against the local collaborators

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use paperflow_core::{format_size, BatchId, ItemId, ProjectId};
use paperflow_ingestion::{
    Analysis, AssignmentFailure, BatchEvent, BatchHandle, BatchSummary, DocumentMetadata,
    IngestItem, IngestionPipeline, ItemStatus, ItemUpdate, Rejection,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tabled::{Table, Tabled};
use tracing::info;

use super::{collect_candidates, load_config};
use crate::local;
use crate::output::{self, OutputFormat};

#[derive(Debug, Serialize)]
struct ItemReport {
    id: ItemId,
    name: String,
    media_type: String,
    size_bytes: u64,
    status: ItemStatus,
    retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<DocumentMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis: Option<Analysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&IngestItem> for ItemReport {
    fn from(item: &IngestItem) -> Self {
        Self {
            id: item.id,
            name: item.name.clone(),
            media_type: item.media_type.label().to_string(),
            size_bytes: item.size_bytes,
            status: item.status(),
            retry_count: item.retry_count(),
            metadata: item.metadata().cloned(),
            analysis: item.analysis().cloned(),
            error: item.error().map(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct BatchReport {
    batch_id: BatchId,
    project_id: ProjectId,
    cancelled: bool,
    elapsed_ms: u64,
    summary: BatchSummary,
    /// Items of this batch present in the project catalog
    filed: usize,
    items: Vec<ItemReport>,
    rejections: Vec<Rejection>,
    assignment_failures: Vec<AssignmentFailure>,
}

enum Outcome {
    Settled,
    Cancelled,
}

pub async fn run(
    paths: &[PathBuf],
    project: &str,
    concurrency: Option<usize>,
    output_dir: &Path,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let config = load_config(config_path)?;
    let candidates = collect_candidates(paths, &config.validation).await?;
    if candidates.is_empty() {
        anyhow::bail!("No files found to ingest");
    }

    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let pipeline = IngestionPipeline::from_config(local::collaborators(output_dir), &config)?;
    let limit = concurrency.unwrap_or(config.pipeline.concurrency_limit);
    let batch = pipeline.create_batch(candidates, &config.validation, project, limit)?;

    info!(
        batch_id = %batch.id(),
        project_id = %batch.project_id(),
        output_dir = %output_dir.display(),
        "Starting ingestion"
    );

    if !format.is_structured() {
        print_header(&batch);
    }

    let started = Instant::now();
    let mut progress = if !format.is_structured() {
        Some(ProgressDisplay::new(&batch.items())?)
    } else {
        None
    };

    let mut subscription = batch.start();
    let done = batch.done();
    tokio::pin!(done);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    let outcome = loop {
        tokio::select! {
            biased;
            _ = &mut interrupt => {
                batch.cancel();
                break Outcome::Cancelled;
            }
            result = &mut done => {
                result?;
                break Outcome::Settled;
            }
            event = subscription.next() => match event {
                Some(event) => {
                    if let Some(progress) = progress.as_mut() {
                        progress.handle(&event);
                    }
                }
                None => {
                    (&mut done).await?;
                    break Outcome::Settled;
                }
            },
        }
    };

    if let Outcome::Cancelled = outcome {
        if let Some(progress) = progress.as_ref() {
            progress.note(&format!(
                "{} waiting for in-flight documents (Ctrl-C again to stop)",
                "Cancelled:".yellow()
            ));
        }
        while batch.summary().in_flight() > 0 {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = subscription.next() => match event {
                    Some(event) => {
                        if let Some(progress) = progress.as_mut() {
                            progress.handle(&event);
                        }
                    }
                    None => break,
                },
            }
        }
    }

    if let Some(progress) = progress.take() {
        progress.finish(&batch.summary());
    }

    let filed = local::read_catalog(&output_dir.join(local::CATALOG_FILE))
        .await
        .context("Failed to read the project catalog")?
        .iter()
        .filter(|entry| batch.item(entry.item_id).is_some())
        .count();

    let report = BatchReport {
        batch_id: batch.id(),
        project_id: batch.project_id().clone(),
        cancelled: matches!(outcome, Outcome::Cancelled),
        elapsed_ms: started.elapsed().as_millis() as u64,
        summary: batch.summary(),
        filed,
        items: batch.items().iter().map(ItemReport::from).collect(),
        rejections: batch.rejections().to_vec(),
        assignment_failures: batch.assignment_failures(),
    };

    if format.is_structured() {
        println!("{}", output::render(&report, format)?);
    } else {
        print_report(&report);
    }

    info!(
        batch_id = %report.batch_id,
        completed = report.summary.completed,
        failed = report.summary.failed,
        elapsed_ms = report.elapsed_ms,
        "Ingestion finished"
    );

    if report.cancelled {
        anyhow::bail!("Ingestion cancelled");
    }
    if report.summary.failed > 0 {
        anyhow::bail!(
            "{} of {} documents failed",
            report.summary.failed,
            report.summary.admitted()
        );
    }

    Ok(())
}

fn print_header(batch: &BatchHandle) {
    let summary = batch.summary();
    output::key_value("Batch", &batch.id().to_string());
    output::key_value("Project", batch.project_id().as_str());
    output::key_value(
        "Documents",
        &format!(
            "{} admitted ({}), {} rejected",
            summary.admitted(),
            format_size(summary.total_bytes),
            summary.rejected
        ),
    );
    output::key_value("Workers", &batch.concurrency_limit().to_string());

    for rejection in batch.rejections() {
        output::warning(&format!(
            "{} {}: {}",
            output::reason_label(rejection.reason),
            rejection.name,
            rejection.detail
        ));
    }
    println!();
}

/// One bar per item plus an overall bar
struct ProgressDisplay {
    multi: MultiProgress,
    overall: ProgressBar,
    bars: HashMap<ItemId, ProgressBar>,
}

impl ProgressDisplay {
    fn new(items: &[IngestItem]) -> Result<Self> {
        let multi = MultiProgress::new();
        let item_style = ProgressStyle::default_bar()
            .template("{prefix:30} [{bar:30.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("=> ");

        let mut bars = HashMap::new();
        for item in items {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(item_style.clone());
            bar.set_prefix(output::truncate(&item.name, 30));
            bar.set_message(output::status_label(item.status()).to_string());
            bars.insert(item.id, bar);
        }

        let overall = multi.add(ProgressBar::new(100));
        overall.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:30.bold} [{bar:30.green}] {pos:>3}% {msg}")?
                .progress_chars("## "),
        );
        overall.set_prefix("Overall");

        Ok(Self {
            multi,
            overall,
            bars,
        })
    }

    fn handle(&mut self, event: &BatchEvent) {
        match event {
            BatchEvent::Item(update) => self.update_item(update),
            BatchEvent::Summary(summary) => self.update_summary(summary),
            BatchEvent::AssignmentFailed { item_id, reason } => {
                let name = self
                    .bars
                    .get(item_id)
                    .map(|bar| bar.prefix())
                    .unwrap_or_else(|| item_id.to_string());
                self.note(&format!(
                    "{} {} was not filed under the project: {}",
                    "⚠".yellow(),
                    name.trim(),
                    reason
                ));
            }
            BatchEvent::Settled(summary) => {
                self.update_summary(summary);
                self.overall.set_message("settled".green().to_string());
            }
            BatchEvent::Cancelled => {
                self.overall.set_message("cancelled".yellow().to_string());
            }
        }
    }

    fn update_item(&mut self, update: &ItemUpdate) {
        let Some(bar) = self.bars.get(&update.item_id) else {
            return;
        };

        bar.set_position(update.progress as u64);
        let mut message = output::status_label(update.status).to_string();
        if update.retry_count > 0 {
            message.push_str(&format!(" (retry {})", update.retry_count));
        }
        bar.set_message(message);
    }

    fn update_summary(&self, summary: &BatchSummary) {
        self.overall.set_position(summary.overall_percent() as u64);
        self.overall.set_message(format!(
            "{}/{} completed, {} failed",
            summary.completed,
            summary.admitted(),
            summary.failed
        ));
    }

    fn note(&self, message: &str) {
        let _ = self.multi.println(message);
    }

    fn finish(self, summary: &BatchSummary) {
        self.update_summary(summary);
        for bar in self.bars.values() {
            bar.abandon();
        }
        self.overall.abandon();
    }
}

fn print_report(report: &BatchReport) {
    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Type")]
        media_type: String,
        #[tabled(rename = "Size")]
        size: String,
        #[tabled(rename = "Status")]
        status: String,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Confidence")]
        confidence: String,
        #[tabled(rename = "Error")]
        error: String,
    }

    let rows: Vec<Row> = report
        .items
        .iter()
        .map(|item| Row {
            name: output::truncate(&item.name, 30),
            media_type: item.media_type.clone(),
            size: format_size(item.size_bytes),
            status: item.status.to_string(),
            title: item
                .metadata
                .as_ref()
                .map(|m| output::truncate(&m.title, 40))
                .unwrap_or_else(|| "-".to_string()),
            confidence: item
                .analysis
                .as_ref()
                .map(|a| format!("{} ({})", a.confidence(), a.relevance_score))
                .unwrap_or_else(|| "-".to_string()),
            error: item
                .error
                .as_deref()
                .map(|e| output::truncate(e, 40))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    output::section("Results");
    if rows.is_empty() {
        output::dimmed("No documents were admitted.");
    } else {
        println!("{}", Table::new(rows));
    }

    for failure in &report.assignment_failures {
        output::warning(&format!(
            "{} was not filed under {}: {}",
            failure.item_id, report.project_id, failure.reason
        ));
    }

    let summary = &report.summary;
    println!();
    output::key_value(
        "Summary",
        &format!(
            "{} completed, {} failed, {} rejected, {} not started",
            summary.completed, summary.failed, summary.rejected, summary.ready
        ),
    );
    output::key_value(
        "Filed",
        &format!("{} under {}", report.filed, report.project_id),
    );
    output::key_value("Elapsed", &output::format_duration(report.elapsed_ms));

    if report.cancelled {
        output::warning("Batch was cancelled before every document finished");
    } else if summary.failed == 0 {
        output::success(&format!("{} documents ingested", summary.completed));
    }
}

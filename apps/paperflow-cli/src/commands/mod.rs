//! CLI command implementations

pub mod config;
pub mod ingest;
pub mod validate;

use anyhow::{Context, Result};
use paperflow_core::{IngestConfig, ValidationPolicy};
use paperflow_ingestion::CandidateFile;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Load the effective configuration: file when given, then `PAPERFLOW__*` overrides
pub fn load_config(path: Option<&Path>) -> Result<IngestConfig> {
    match path {
        Some(path) => IngestConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => IngestConfig::load().context("Failed to load configuration"),
    }
}

/// Expand directories into their files, in a stable order
pub fn expand_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter(|entry| !is_hidden(entry.path()))
                .map(|entry| entry.into_path())
                .collect();
            found.sort();
            files.extend(found);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            anyhow::bail!("No such file or directory: {}", path.display());
        }
    }

    Ok(files)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// Read every file under `paths` as an ingestion candidate. Files the policy
/// rejects by type or size are only described, never read.
pub async fn collect_candidates(
    paths: &[PathBuf],
    policy: &ValidationPolicy,
) -> Result<Vec<CandidateFile>> {
    let mut candidates = Vec::new();
    for path in expand_paths(paths)? {
        let candidate = CandidateFile::from_file(&path, policy)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        candidates.push(candidate);
    }
    Ok(candidates)
}

/// Describe every file under `paths` from its metadata, without reading content
pub async fn describe_candidates(paths: &[PathBuf]) -> Result<Vec<CandidateFile>> {
    let mut candidates = Vec::new();
    for path in expand_paths(paths)? {
        let candidate = CandidateFile::stat(&path)
            .await
            .with_context(|| format!("Failed to inspect {}", path.display()))?;
        candidates.push(candidate);
    }
    Ok(candidates)
}

//! Local collaborators
//!
//! Lets the CLI run a batch without any remote service: uploads are copies
//! into an output directory, metadata and analysis are text heuristics, and
//! project assignments are appended to a JSON-lines catalog.

use async_trait::async_trait;
use futures::stream;
use lazy_static::lazy_static;
use paperflow_core::{ItemId, MediaType, ProjectId};
use paperflow_ingestion::{
    Analysis, AnalysisService, CollaboratorError, Collaborators, ContentHandle, DocumentMetadata,
    ExtractedDocument, MetadataService, ProjectCatalog, StorageBackend, UploadStream, UploadUpdate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

pub const CATALOG_FILE: &str = "catalog.jsonl";
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
const UNTITLED: &str = "Untitled document";

lazy_static! {
    static ref YEAR: Regex = Regex::new(r"\b(19[5-9]\d|20\d{2})\b").unwrap();
    static ref AUTHORS: Regex = Regex::new(r"(?im)^\s*(?:by|authors?)\s*:?\s+(.+)$").unwrap();
    static ref KEYWORDS: Regex = Regex::new(r"(?im)^\s*(?:keywords|key words)\s*:\s*(.+)$").unwrap();
    static ref ABSTRACT: Regex =
        Regex::new(r"(?is)\babstract\b\s*[:.\-]?\s*(.+?)(?:\n\s*\n|\z)").unwrap();
    static ref CITATION: Regex =
        Regex::new(r"\[\d+(?:[,\u{2013}-]\s*\d+)*\]|\([A-Z][A-Za-z\-]+(?: et al\.)?,? \d{4}\)").unwrap();
}

/// Wire the local collaborators under `root`
pub fn collaborators(root: &Path) -> Collaborators {
    Collaborators::new(
        Arc::new(DirectoryStorage::new(root.join("files"), DEFAULT_CHUNK_SIZE)),
        Arc::new(HeuristicMetadata),
        Arc::new(HeuristicAnalyzer),
        Arc::new(JsonLinesCatalog::new(root.join(CATALOG_FILE))),
    )
}

// ==================== Storage ====================

/// Copies each item into `<root>/<item_id>` in fixed-size chunks
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    root: PathBuf,
    chunk_size: usize,
}

impl DirectoryStorage {
    pub fn new(root: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            root: root.into(),
            chunk_size: chunk_size.max(1),
        }
    }
}

enum Transfer {
    Open {
        root: PathBuf,
        path: PathBuf,
        content: ContentHandle,
        chunk_size: usize,
    },
    Writing {
        file: tokio::fs::File,
        content: ContentHandle,
        written: usize,
        chunk_size: usize,
    },
    Done,
}

impl Transfer {
    async fn step(self) -> Option<(Result<UploadUpdate, CollaboratorError>, Transfer)> {
        match self {
            Transfer::Open {
                root,
                path,
                content,
                chunk_size,
            } => {
                let opened = async {
                    tokio::fs::create_dir_all(&root).await?;
                    tokio::fs::File::create(&path).await
                }
                .await;

                match opened {
                    Ok(file) => Some((
                        Ok(UploadUpdate::Progress(0)),
                        Transfer::Writing {
                            file,
                            content,
                            written: 0,
                            chunk_size,
                        },
                    )),
                    Err(e) => Some((Err(io_failure(&path, e)), Transfer::Done)),
                }
            }
            Transfer::Writing {
                mut file,
                content,
                written,
                chunk_size,
            } => {
                let total = content.len();
                if written >= total {
                    return match file.sync_all().await {
                        Ok(()) => Some((Ok(UploadUpdate::Complete), Transfer::Done)),
                        Err(e) => Some((
                            Err(CollaboratorError::failed(e.to_string())),
                            Transfer::Done,
                        )),
                    };
                }

                let end = (written + chunk_size).min(total);
                if let Err(e) = file.write_all(&content.as_bytes()[written..end]).await {
                    return Some((Err(CollaboratorError::failed(e.to_string())), Transfer::Done));
                }

                let percent = (end * 100 / total) as u8;
                Some((
                    Ok(UploadUpdate::Progress(percent)),
                    Transfer::Writing {
                        file,
                        content,
                        written: end,
                        chunk_size,
                    },
                ))
            }
            Transfer::Done => None,
        }
    }
}

fn io_failure(path: &Path, e: std::io::Error) -> CollaboratorError {
    CollaboratorError::failed(format!("{}: {}", path.display(), e))
}

impl StorageBackend for DirectoryStorage {
    fn upload(&self, item_id: ItemId, content: ContentHandle) -> UploadStream {
        let transfer = Transfer::Open {
            root: self.root.clone(),
            path: self.root.join(item_id.to_string()),
            content,
            chunk_size: self.chunk_size,
        };
        Box::pin(stream::unfold(transfer, Transfer::step))
    }
}

// ==================== Metadata ====================

/// Reads bibliographic fields from the document's text layout
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicMetadata;

impl HeuristicMetadata {
    pub fn parse(text: &str) -> DocumentMetadata {
        let title = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or(UNTITLED)
            .to_string();

        let authors = AUTHORS
            .captures(text)
            .map(|c| split_list(&c[1], &[",", ";", " and "]))
            .unwrap_or_default();

        let keywords = KEYWORDS
            .captures(text)
            .map(|c| split_list(&c[1], &[",", ";"]))
            .unwrap_or_default();

        let publication_year = YEAR
            .captures(text)
            .and_then(|c| c[1].parse::<u16>().ok());

        let abstract_text = ABSTRACT
            .captures(text)
            .map(|c| collapse_whitespace(&c[1]))
            .unwrap_or_default();

        DocumentMetadata {
            title,
            authors,
            publication_year,
            keywords,
            abstract_text,
        }
    }
}

fn split_list(raw: &str, separators: &[&str]) -> Vec<String> {
    let mut parts = vec![raw.to_string()];
    for separator in separators {
        parts = parts
            .iter()
            .flat_map(|part| part.split(separator))
            .map(str::to_string)
            .collect();
    }
    parts
        .into_iter()
        .map(|part| part.trim().trim_end_matches('.').to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep the readable runs of a binary document
fn printable_text(bytes: &[u8]) -> String {
    let lossy = String::from_utf8_lossy(bytes);
    lossy
        .lines()
        .map(|line| {
            line.chars()
                .filter(|c| !c.is_control() && *c != '\u{fffd}')
                .collect::<String>()
        })
        .filter(|line| {
            let letters = line.chars().filter(|c| c.is_alphabetic()).count();
            letters >= 3 && letters * 2 >= line.chars().count()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl MetadataService for HeuristicMetadata {
    async fn extract(
        &self,
        _item_id: ItemId,
        content: ContentHandle,
        media_type: MediaType,
    ) -> Result<ExtractedDocument, CollaboratorError> {
        let text = match media_type {
            MediaType::Txt => String::from_utf8(content.as_bytes().to_vec())
                .map_err(|_| CollaboratorError::failed("text document is not valid UTF-8"))?,
            MediaType::Pdf | MediaType::Doc | MediaType::Docx => printable_text(content.as_bytes()),
            MediaType::Other => {
                return Err(CollaboratorError::failed("unsupported media type"));
            }
        };

        if text.trim().is_empty() {
            return Err(CollaboratorError::failed("no readable text found"));
        }

        Ok(ExtractedDocument {
            metadata: Self::parse(&text),
            text,
        })
    }
}

// ==================== Analysis ====================

/// Scores documents on length, structure and citation density
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAnalyzer;

impl HeuristicAnalyzer {
    pub fn score(text: &str) -> Analysis {
        let words = text.split_whitespace().count();
        let citations = CITATION.find_iter(text).count() as u32;
        let has_abstract = ABSTRACT.is_match(text);
        let has_keywords = KEYWORDS.is_match(text);

        let mut relevance = 40u32;
        relevance += (words as u32 / 50).min(25);
        relevance += citations.min(15);
        if has_abstract {
            relevance += 10;
        }
        if has_keywords {
            relevance += 10;
        }

        Analysis {
            summary: summarize(text, 2),
            citation_count_estimate: citations,
            relevance_score: relevance.min(100) as u8,
        }
    }
}

/// First `sentences` sentences of the body, skipping the title line
fn summarize(text: &str, sentences: usize) -> String {
    let body: String = text.lines().skip(1).collect::<Vec<_>>().join(" ");
    let body = collapse_whitespace(if body.trim().is_empty() { text } else { &body });

    let mut summary = String::new();
    let mut taken = 0;
    for piece in body.split_inclusive(['.', '!', '?']) {
        summary.push_str(piece);
        taken += 1;
        if taken == sentences {
            break;
        }
    }
    summary.trim().to_string()
}

#[async_trait]
impl AnalysisService for HeuristicAnalyzer {
    async fn analyze(&self, _item_id: ItemId, text: &str) -> Result<Analysis, CollaboratorError> {
        Ok(Self::score(text))
    }
}

// ==================== Catalog ====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub item_id: ItemId,
    pub project_id: ProjectId,
    pub assigned_at: chrono::DateTime<chrono::Utc>,
}

/// Appends one JSON line per assignment
#[derive(Debug)]
pub struct JsonLinesCatalog {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonLinesCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }
}

/// Entries recorded so far; a missing file means none
pub async fn read_catalog(path: &Path) -> anyhow::Result<Vec<CatalogEntry>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| Ok(serde_json::from_str(line)?))
        .collect()
}

#[async_trait]
impl ProjectCatalog for JsonLinesCatalog {
    async fn assign_to_project(
        &self,
        item_id: ItemId,
        project_id: ProjectId,
    ) -> Result<(), CollaboratorError> {
        let entry = CatalogEntry {
            item_id,
            project_id,
            assigned_at: chrono::Utc::now(),
        };
        let mut line = serde_json::to_string(&entry)
            .map_err(|e| CollaboratorError::failed(e.to_string()))?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| io_failure(&self.path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| io_failure(&self.path, e))?;
        file.flush().await.map_err(|e| io_failure(&self.path, e))?;

        Ok(())
    }
}

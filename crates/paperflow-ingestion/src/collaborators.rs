//! External collaborators
//!
//! The pipeline never talks to storage, extraction, analysis or the project
//! catalog directly. It drives them through the traits in this module so the
//! orchestration logic can be exercised against in-memory doubles.

use async_trait::async_trait;
use futures::stream::BoxStream;
use paperflow_core::{ItemId, MediaType, ProjectId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Cheaply clonable handle to the raw bytes of a submitted document
#[derive(Clone)]
pub struct ContentHandle(Arc<[u8]>);

impl ContentHandle {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for ContentHandle {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

impl From<&[u8]> for ContentHandle {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.into())
    }
}

impl std::fmt::Debug for ContentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentHandle")
            .field("len", &self.0.len())
            .finish()
    }
}

/// Failure reported by a collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Operation timed out")]
    Timeout,

    #[error("{0}")]
    Failed(String),
}

impl CollaboratorError {
    pub fn failed(reason: impl Into<String>) -> Self {
        CollaboratorError::Failed(reason.into())
    }
}

/// Signal emitted by the storage backend while a transfer is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadUpdate {
    /// Transfer progress, 0..=100
    Progress(u8),
    /// The transfer finished and the bytes are durable
    Complete,
}

/// Stream of transfer signals. Ends after `Complete` or the first error.
pub type UploadStream = BoxStream<'static, Result<UploadUpdate, CollaboratorError>>;

/// Storage/transfer backend
pub trait StorageBackend: Send + Sync {
    fn upload(&self, item_id: ItemId, content: ContentHandle) -> UploadStream;
}

/// Bibliographic record extracted from a document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    pub authors: Vec<String>,
    pub publication_year: Option<u16>,
    pub keywords: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
}

/// Output of the metadata service: the record plus the text analysis runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub metadata: DocumentMetadata,
    pub text: String,
}

#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn extract(
        &self,
        item_id: ItemId,
        content: ContentHandle,
        media_type: MediaType,
    ) -> Result<ExtractedDocument, CollaboratorError>;
}

/// How much to trust an analysis, banded on its relevance score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::Low => write!(f, "Low"),
            Confidence::Medium => write!(f, "Medium"),
            Confidence::High => write!(f, "High"),
        }
    }
}

/// Content analysis of a document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub summary: String,
    pub citation_count_estimate: u32,
    /// 0..=100
    pub relevance_score: u8,
}

impl Analysis {
    pub fn confidence(&self) -> Confidence {
        match self.relevance_score {
            90..=u8::MAX => Confidence::High,
            70..=89 => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze(&self, item_id: ItemId, text: &str) -> Result<Analysis, CollaboratorError>;
}

/// Destination for completed items
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProjectCatalog: Send + Sync {
    async fn assign_to_project(
        &self,
        item_id: ItemId,
        project_id: ProjectId,
    ) -> Result<(), CollaboratorError>;
}

/// The full set of collaborators a batch runs against
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn StorageBackend>,
    pub metadata: Arc<dyn MetadataService>,
    pub analysis: Arc<dyn AnalysisService>,
    pub catalog: Arc<dyn ProjectCatalog>,
}

impl Collaborators {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        metadata: Arc<dyn MetadataService>,
        analysis: Arc<dyn AnalysisService>,
        catalog: Arc<dyn ProjectCatalog>,
    ) -> Self {
        Self {
            storage,
            metadata,
            analysis,
            catalog,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Caller edits to a completed item's metadata. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEdit {
    pub title: Option<String>,
    pub authors: Option<Vec<String>>,
    pub publication_year: Option<Option<u16>>,
    pub keywords: Option<Vec<String>>,
    pub abstract_text: Option<String>,
}

impl MetadataEdit {
    pub fn apply_to(self, metadata: &mut DocumentMetadata) {
        if let Some(title) = self.title {
            metadata.title = title;
        }
        if let Some(authors) = self.authors {
            metadata.authors = authors;
        }
        if let Some(year) = self.publication_year {
            metadata.publication_year = year;
        }
        if let Some(keywords) = self.keywords {
            metadata.keywords = keywords
                .into_iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }
        if let Some(abstract_text) = self.abstract_text {
            metadata.abstract_text = abstract_text;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_bands() {
        let analysis = |score| Analysis {
            relevance_score: score,
            ..Default::default()
        };

        assert_eq!(analysis(95).confidence(), Confidence::High);
        assert_eq!(analysis(90).confidence(), Confidence::High);
        assert_eq!(analysis(89).confidence(), Confidence::Medium);
        assert_eq!(analysis(70).confidence(), Confidence::Medium);
        assert_eq!(analysis(69).confidence(), Confidence::Low);
    }

    #[test]
    fn test_metadata_edit_keeps_unset_fields() {
        let mut metadata = DocumentMetadata {
            title: "Draft".to_string(),
            authors: vec!["Smith, J.".to_string()],
            publication_year: Some(2024),
            keywords: vec!["climate".to_string()],
            abstract_text: "About climate.".to_string(),
        };

        MetadataEdit {
            title: Some("Final".to_string()),
            keywords: Some(vec![" ai ".to_string(), "".to_string(), "ethics".to_string()]),
            ..Default::default()
        }
        .apply_to(&mut metadata);

        assert_eq!(metadata.title, "Final");
        assert_eq!(metadata.authors, vec!["Smith, J."]);
        assert_eq!(metadata.publication_year, Some(2024));
        assert_eq!(metadata.keywords, vec!["ai", "ethics"]);
    }

    #[test]
    fn test_metadata_serializes_abstract_field() {
        let metadata = DocumentMetadata {
            abstract_text: "Short.".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["abstract"], "Short.");
    }

    #[test]
    fn test_content_handle_debug_hides_bytes() {
        let handle = ContentHandle::from(b"secret".to_vec());
        assert_eq!(format!("{:?}", handle), "ContentHandle { len: 6 }");
        assert_eq!(handle.as_bytes(), b"secret");
    }
}

use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

// Newtype wrappers for type safety

/// Identifier of an admitted ingest item. Assigned at admission and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of the catalog project completed items are assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A project id made only of whitespace cannot address a project.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProjectId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// Media types

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOC: &str = "application/msword";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TXT: &str = "text/plain";

/// Declared media type of a submitted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Pdf,
    Doc,
    Docx,
    Txt,
    Other,
}

impl MediaType {
    /// The media types accepted by the default validation policy.
    pub const DOCUMENTS: [MediaType; 4] =
        [MediaType::Pdf, MediaType::Doc, MediaType::Docx, MediaType::Txt];

    pub fn from_mime(mime: &str) -> Self {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            MIME_PDF => MediaType::Pdf,
            MIME_DOC => MediaType::Doc,
            MIME_DOCX => MediaType::Docx,
            MIME_TXT => MediaType::Txt,
            _ => MediaType::Other,
        }
    }

    /// Guess the media type from a file name or path extension.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        mime_guess::from_path(path)
            .iter()
            .map(|mime| MediaType::from_mime(mime.essence_str()))
            .find(|media_type| *media_type != MediaType::Other)
            .unwrap_or(MediaType::Other)
    }

    pub fn mime(&self) -> &'static str {
        match self {
            MediaType::Pdf => MIME_PDF,
            MediaType::Doc => MIME_DOC,
            MediaType::Docx => MIME_DOCX,
            MediaType::Txt => MIME_TXT,
            MediaType::Other => "application/octet-stream",
        }
    }

    /// Short label shown next to a file in listings.
    pub fn label(&self) -> &'static str {
        match self {
            MediaType::Pdf => "PDF",
            MediaType::Doc => "DOC",
            MediaType::Docx => "DOCX",
            MediaType::Txt => "TXT",
            MediaType::Other => "Unknown",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(MediaType::Pdf),
            "doc" => Ok(MediaType::Doc),
            "docx" => Ok(MediaType::Docx),
            "txt" => Ok(MediaType::Txt),
            "other" => Ok(MediaType::Other),
            other => Err(format!("Unknown media type: {}", other)),
        }
    }
}

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Render a byte count in megabytes with one decimal, e.g. `2.4MB`.
pub fn format_size(bytes: u64) -> String {
    format!("{:.1}MB", bytes as f64 / BYTES_PER_MB)
}

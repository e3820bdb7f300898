//! Admission checks for submitted files
//!
//! Validation is synchronous and touches neither storage nor the network. Each
//! candidate is checked against the rules in a fixed order and the first rule
//! it breaks decides its [`RejectionReason`].

use paperflow_core::{format_size, MediaType, OverflowPolicy, ValidationPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

use crate::collaborators::ContentHandle;
use crate::item::IngestItem;
use crate::Result;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// A file offered for ingestion, before the admission decision
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub name: String,
    pub size_bytes: u64,
    pub media_type: MediaType,
    pub content: ContentHandle,
}

impl CandidateFile {
    pub fn new(
        name: impl Into<String>,
        size_bytes: u64,
        media_type: MediaType,
        content: ContentHandle,
    ) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            media_type,
            content,
        }
    }

    /// Build a candidate from in-memory bytes, guessing the type from the name
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let media_type = MediaType::from_path(&name);
        let size_bytes = bytes.len() as u64;
        Self::new(name, size_bytes, media_type, ContentHandle::from(bytes))
    }

    /// Describe a file from its metadata alone. The content stays empty, which
    /// is enough for an admission decision.
    pub async fn stat(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let size_bytes = tokio::fs::metadata(path).await?.len();

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self::new(
            name,
            size_bytes,
            MediaType::from_path(path),
            ContentHandle::from(Vec::<u8>::new()),
        ))
    }

    /// Read a candidate from disk. A file `policy` rejects by type or size is
    /// described but never read.
    pub async fn from_file(path: impl AsRef<Path>, policy: &ValidationPolicy) -> Result<Self> {
        let path = path.as_ref();
        let candidate = Self::stat(path).await?;
        if !policy.allows(candidate.media_type) || candidate.size_bytes > policy.max_file_size {
            debug!(name = %candidate.name, size_bytes = candidate.size_bytes, "Skipping read of inadmissible file");
            return Ok(candidate);
        }

        let bytes = tokio::fs::read(path).await?;
        Ok(Self {
            size_bytes: bytes.len() as u64,
            content: ContentHandle::from(bytes),
            ..candidate
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    UnsupportedType,
    TooLarge,
    Duplicate,
    BatchFull,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::UnsupportedType => write!(f, "unsupported_type"),
            RejectionReason::TooLarge => write!(f, "too_large"),
            RejectionReason::Duplicate => write!(f, "duplicate"),
            RejectionReason::BatchFull => write!(f, "batch_full"),
        }
    }
}

/// A candidate turned away by validation. It never receives an item id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub name: String,
    pub size_bytes: u64,
    pub media_type: MediaType,
    pub reason: RejectionReason,
    /// Human readable explanation
    pub detail: String,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.detail)
    }
}

/// Outcome of [`admit`]: every candidate lands in exactly one of the two lists
#[derive(Debug, Default)]
pub struct Admission {
    pub admitted: Vec<IngestItem>,
    pub rejected: Vec<Rejection>,
}

impl Admission {
    pub fn len(&self) -> usize {
        self.admitted.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partition candidates into admitted items and rejections.
///
/// Rules, first failure wins:
/// 1. media type not allowed by the policy
/// 2. larger than `max_file_size`
/// 3. same name and size as an existing item or one admitted earlier in this call
/// 4. the batch ceiling would be exceeded
pub fn admit(
    candidates: Vec<CandidateFile>,
    existing: &[IngestItem],
    policy: &ValidationPolicy,
) -> Admission {
    let mut seen: HashSet<(String, u64)> = existing
        .iter()
        .map(|item| (item.name.clone(), item.size_bytes))
        .collect();

    let room = policy.max_items_per_batch.saturating_sub(existing.len());
    let mut passed = Vec::with_capacity(candidates.len().min(room));
    let mut rejected = Vec::new();

    for candidate in candidates {
        let key = (candidate.name.clone(), candidate.size_bytes);
        let reason = if !policy.allows(candidate.media_type) {
            Some(RejectionReason::UnsupportedType)
        } else if candidate.size_bytes > policy.max_file_size {
            Some(RejectionReason::TooLarge)
        } else if seen.contains(&key) {
            Some(RejectionReason::Duplicate)
        } else if policy.overflow == OverflowPolicy::PartialAdmit && passed.len() >= room {
            Some(RejectionReason::BatchFull)
        } else {
            None
        };

        match reason {
            Some(reason) => rejected.push(reject(candidate, reason, policy)),
            None => {
                seen.insert(key);
                passed.push(candidate);
            }
        }
    }

    // All-or-nothing: the whole valid part of the submission must fit
    if passed.len() > room {
        rejected.extend(
            passed
                .drain(..)
                .map(|c| reject(c, RejectionReason::BatchFull, policy)),
        );
    }

    let admitted = passed
        .into_iter()
        .map(|c| IngestItem::new(c.name, c.size_bytes, c.media_type, c.content))
        .collect();

    Admission { admitted, rejected }
}

fn reject(candidate: CandidateFile, reason: RejectionReason, policy: &ValidationPolicy) -> Rejection {
    let detail = match reason {
        RejectionReason::UnsupportedType => {
            format!("Unsupported file type. Please use {} files.", allowed_list(policy))
        }
        RejectionReason::TooLarge => {
            format!("File size exceeds {} limit.", size_limit(policy.max_file_size))
        }
        RejectionReason::Duplicate => "Duplicate file detected.".to_string(),
        RejectionReason::BatchFull => format!(
            "Cannot upload more than {} files at once.",
            policy.max_items_per_batch
        ),
    };

    debug!(
        name = %candidate.name,
        size_bytes = candidate.size_bytes,
        reason = %reason,
        "Candidate rejected"
    );

    Rejection {
        name: candidate.name,
        size_bytes: candidate.size_bytes,
        media_type: candidate.media_type,
        reason,
        detail,
    }
}

/// "PDF, DOC, DOCX, or TXT"
fn allowed_list(policy: &ValidationPolicy) -> String {
    let labels: Vec<&str> = policy.allowed_types.iter().map(|t| t.label()).collect();
    match labels.as_slice() {
        [] => "no".to_string(),
        [only] => only.to_string(),
        [head @ .., last] => format!("{}, or {}", head.join(", "), last),
    }
}

fn size_limit(bytes: u64) -> String {
    if bytes % BYTES_PER_MB == 0 {
        format!("{}MB", bytes / BYTES_PER_MB)
    } else {
        format_size(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn candidate(name: &str, size_bytes: u64) -> CandidateFile {
        CandidateFile::new(
            name,
            size_bytes,
            MediaType::from_path(name),
            ContentHandle::from(vec![0u8; 4]),
        )
    }

    fn reasons(admission: &Admission) -> Vec<(String, RejectionReason)> {
        admission
            .rejected
            .iter()
            .map(|r| (r.name.clone(), r.reason))
            .collect()
    }

    #[test]
    fn test_admits_valid_candidates_in_order() {
        let admission = admit(
            vec![candidate("a.pdf", 10), candidate("b.docx", 20), candidate("c.txt", 30)],
            &[],
            &ValidationPolicy::default(),
        );

        let names: Vec<_> = admission.admitted.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "b.docx", "c.txt"]);
        assert!(admission.rejected.is_empty());
        assert_eq!(admission.len(), 3);
    }

    #[test]
    fn test_unsupported_type() {
        let admission = admit(
            vec![candidate("photo.png", 10)],
            &[],
            &ValidationPolicy::default(),
        );

        assert_eq!(
            reasons(&admission),
            vec![("photo.png".to_string(), RejectionReason::UnsupportedType)]
        );
        assert_eq!(
            admission.rejected[0].detail,
            "Unsupported file type. Please use PDF, DOC, DOCX, or TXT files."
        );
    }

    #[test]
    fn test_too_large() {
        let policy = ValidationPolicy::default();
        let admission = admit(
            vec![candidate("huge.pdf", policy.max_file_size + 1), candidate("edge.pdf", policy.max_file_size)],
            &[],
            &policy,
        );

        assert_eq!(admission.admitted.len(), 1);
        assert_eq!(admission.admitted[0].name, "edge.pdf");
        assert_eq!(admission.rejected[0].reason, RejectionReason::TooLarge);
        assert_eq!(admission.rejected[0].detail, "File size exceeds 50MB limit.");
    }

    #[test]
    fn test_first_failing_rule_wins() {
        let policy = ValidationPolicy::default().with_max_file_size(100);
        let admission = admit(vec![candidate("huge.png", 1_000)], &[], &policy);

        assert_eq!(admission.rejected[0].reason, RejectionReason::UnsupportedType);
    }

    #[test]
    fn test_duplicates_within_submission_and_existing() {
        let existing = admit(vec![candidate("a.pdf", 10)], &[], &ValidationPolicy::default()).admitted;

        let admission = admit(
            vec![
                candidate("a.pdf", 10),
                candidate("a.pdf", 11),
                candidate("b.pdf", 10),
                candidate("b.pdf", 10),
            ],
            &existing,
            &ValidationPolicy::default(),
        );

        assert_eq!(admission.admitted.len(), 2);
        assert_eq!(
            reasons(&admission),
            vec![
                ("a.pdf".to_string(), RejectionReason::Duplicate),
                ("b.pdf".to_string(), RejectionReason::Duplicate),
            ]
        );
    }

    #[test]
    fn test_batch_full_admits_first_come() {
        let policy = ValidationPolicy::default().with_max_items(2);
        let admission = admit(
            vec![candidate("a.pdf", 1), candidate("b.pdf", 2), candidate("c.pdf", 3)],
            &[],
            &policy,
        );

        let names: Vec<_> = admission.admitted.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
        assert_eq!(
            reasons(&admission),
            vec![("c.pdf".to_string(), RejectionReason::BatchFull)]
        );
        assert_eq!(admission.rejected[0].detail, "Cannot upload more than 2 files at once.");
    }

    #[test]
    fn test_batch_full_counts_existing_items() {
        let policy = ValidationPolicy::default().with_max_items(2);
        let existing = admit(vec![candidate("a.pdf", 1)], &[], &policy).admitted;

        let admission = admit(vec![candidate("b.pdf", 2), candidate("c.pdf", 3)], &existing, &policy);

        assert_eq!(admission.admitted.len(), 1);
        assert_eq!(admission.rejected[0].reason, RejectionReason::BatchFull);
    }

    #[test]
    fn test_reject_submission_overflow() {
        let policy = ValidationPolicy::default()
            .with_max_items(2)
            .with_overflow(OverflowPolicy::RejectSubmission);

        let admission = admit(
            vec![candidate("a.pdf", 1), candidate("b.png", 2), candidate("c.pdf", 3), candidate("d.pdf", 4)],
            &[],
            &policy,
        );

        assert!(admission.admitted.is_empty());
        assert_eq!(
            reasons(&admission),
            vec![
                ("b.png".to_string(), RejectionReason::UnsupportedType),
                ("a.pdf".to_string(), RejectionReason::BatchFull),
                ("c.pdf".to_string(), RejectionReason::BatchFull),
                ("d.pdf".to_string(), RejectionReason::BatchFull),
            ]
        );
    }

    #[test]
    fn test_reject_submission_admits_when_everything_fits() {
        let policy = ValidationPolicy::default()
            .with_max_items(2)
            .with_overflow(OverflowPolicy::RejectSubmission);

        let admission = admit(vec![candidate("a.pdf", 1), candidate("b.png", 2), candidate("c.pdf", 3)], &[], &policy);

        assert_eq!(admission.admitted.len(), 2);
        assert_eq!(admission.rejected.len(), 1);
    }

    #[test]
    fn test_admitted_ids_are_unique() {
        let admission = admit(
            (0..10).map(|i| candidate(&format!("{}.pdf", i), i)).collect(),
            &[],
            &ValidationPolicy::default(),
        );

        let ids: HashSet<_> = admission.admitted.iter().map(|i| i.id).collect();
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn test_allowed_list_formatting() {
        let policy = ValidationPolicy::default().with_allowed_types([MediaType::Pdf]);
        assert_eq!(allowed_list(&policy), "PDF");

        let policy = ValidationPolicy::default().with_allowed_types([MediaType::Pdf, MediaType::Txt]);
        assert_eq!(allowed_list(&policy), "PDF, or TXT");
    }

    #[test]
    fn test_size_limit_label() {
        assert_eq!(size_limit(50 * BYTES_PER_MB), "50MB");
        assert_eq!(size_limit(1536 * 1024), "1.5MB");
    }

    #[test]
    fn test_from_bytes_guesses_type() {
        let candidate = CandidateFile::from_bytes("notes.txt", b"hello".to_vec());
        assert_eq!(candidate.media_type, MediaType::Txt);
        assert_eq!(candidate.size_bytes, 5);
    }

    #[tokio::test]
    async fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper.pdf");
        tokio::fs::write(&path, b"%PDF-1.4").await.unwrap();

        let candidate = CandidateFile::from_file(&path, &ValidationPolicy::default())
            .await
            .unwrap();
        assert_eq!(candidate.name, "paper.pdf");
        assert_eq!(candidate.media_type, MediaType::Pdf);
        assert_eq!(candidate.size_bytes, 8);
        assert_eq!(candidate.content.as_bytes(), b"%PDF-1.4");
    }

    #[tokio::test]
    async fn test_from_file_skips_reading_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.pdf");
        tokio::fs::write(&path, vec![b'x'; 4096]).await.unwrap();
        let policy = ValidationPolicy::default().with_max_file_size(1024);

        let candidate = CandidateFile::from_file(&path, &policy).await.unwrap();
        assert_eq!(candidate.size_bytes, 4096);
        assert!(candidate.content.is_empty());

        let admission = admit(vec![candidate], &[], &policy);
        assert!(admission.admitted.is_empty());
        assert_eq!(admission.rejected[0].reason, RejectionReason::TooLarge);
        assert_eq!(admission.rejected[0].size_bytes, 4096);
    }

    #[tokio::test]
    async fn test_from_file_skips_reading_unsupported_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("figure.png");
        tokio::fs::write(&path, [0x89u8, b'P', b'N', b'G']).await.unwrap();

        let candidate = CandidateFile::from_file(&path, &ValidationPolicy::default())
            .await
            .unwrap();
        assert_eq!(candidate.size_bytes, 4);
        assert!(candidate.content.is_empty());
    }

    #[tokio::test]
    async fn test_stat_never_reads_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        tokio::fs::write(&path, "hello world").await.unwrap();

        let candidate = CandidateFile::stat(&path).await.unwrap();
        assert_eq!(candidate.name, "notes.txt");
        assert_eq!(candidate.media_type, MediaType::Txt);
        assert_eq!(candidate.size_bytes, 11);
        assert!(candidate.content.is_empty());
    }
}

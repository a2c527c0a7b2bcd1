//! Source Document Extraction
//!
//! Plain-text ingestion for event source material. Documents are stored
//! verbatim in the `documents` table; blueprint generation receives them as
//! one combined excerpt, truncated to a prompt-friendly ceiling.

use std::path::Path;

use tracing::{debug, warn};

use crate::ai::embedding::truncate_input;
use crate::store::Database;
use crate::types::{EventId, LoomError, Result};

/// Character ceiling for combined document text fed to blueprint prompts
pub const MAX_COMBINED_CHARS: usize = 24_000;

/// Extensions accepted as plain-text source documents
const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "rst", "text"];

/// One extracted source document, ready for storage
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub title: Option<String>,
    pub content: String,
    pub source_url: Option<String>,
}

/// Extraction boundary for source material.
///
/// `Ok(None)` means the reference yielded nothing usable; ingestion proceeds
/// as if the document did not exist.
pub trait DocumentExtractor {
    fn extract(&self, path: &Path) -> Result<Option<ExtractedDocument>>;
}

/// Extractor for plain-text files on the local filesystem
pub struct PlainTextExtractor;

impl DocumentExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<Option<ExtractedDocument>> {
        read_document(path).map(Some)
    }
}

/// Read one plain-text document from disk.
///
/// Rejects unknown extensions rather than guessing at binary content; the
/// file stem becomes the document title.
pub fn read_document(path: &Path) -> Result<ExtractedDocument> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !TEXT_EXTENSIONS.contains(&extension.as_str()) {
        return Err(LoomError::Config(format!(
            "Unsupported document type '{}': expected one of {}",
            path.display(),
            TEXT_EXTENSIONS.join(", ")
        )));
    }

    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Err(LoomError::Config(format!(
            "Document '{}' is empty",
            path.display()
        )));
    }

    let title = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string);
    debug!(path = %path.display(), chars = content.len(), "Extracted document");

    Ok(ExtractedDocument {
        title,
        content,
        source_url: None,
    })
}

/// Read and store a set of documents for an event with the plain-text
/// extractor. Returns the number stored.
pub fn ingest_documents(
    db: &Database,
    event_id: &EventId,
    paths: &[std::path::PathBuf],
) -> Result<usize> {
    ingest_with(&PlainTextExtractor, db, event_id, paths)
}

/// Extract and store documents through an extraction boundary.
/// Unreadable or empty extractions are logged and skipped.
pub fn ingest_with(
    extractor: &dyn DocumentExtractor,
    db: &Database,
    event_id: &EventId,
    paths: &[std::path::PathBuf],
) -> Result<usize> {
    let mut stored = 0usize;
    for path in paths {
        match extractor.extract(path) {
            Ok(Some(doc)) => {
                db.insert_document(
                    event_id,
                    doc.title.as_deref(),
                    &doc.content,
                    doc.source_url.as_deref(),
                )?;
                stored += 1;
            }
            Ok(None) => debug!(path = %path.display(), "Document yielded no text"),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping document"),
        }
    }
    Ok(stored)
}

/// Combine all stored documents for an event into one excerpt for the
/// blueprint prompt, or `None` when the event has no documents.
pub fn combined_document_text(db: &Database, event_id: &EventId) -> Result<Option<String>> {
    let documents = db.documents_for_event(event_id)?;
    if documents.is_empty() {
        return Ok(None);
    }

    let combined = documents
        .iter()
        .map(|(title, content)| {
            if title.is_empty() {
                content.clone()
            } else {
                format!("## {title}\n{content}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok(Some(
        truncate_input(&combined, MAX_COMBINED_CHARS).to_string(),
    ))
}

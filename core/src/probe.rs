//! First-page metadata extraction used to sharpen classification before the AI tier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::library::{self, Document, DocumentStore};

pub const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_MAX_SNIPPET_CHARS: usize = 500;

/// Raw output of a text-extraction service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    pub title: Option<String>,
    pub author: Option<String>,
}

/// Extracts the first page of a document.
///
/// Must not panic on malformed input; report an [`ExtractionError`] instead.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_first_page(&self, bytes: Vec<u8>) -> Result<ExtractedText, ExtractionError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeResult {
    /// Whitespace-collapsed first-page text, bounded in length. May be empty.
    pub snippet: String,
    pub title: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Document content could not be read")]
    Content(#[from] library::Error),

    #[error("Unsupported document format: {0}")]
    Unsupported(String),

    #[error("Malformed document: {0}")]
    Malformed(String),

    #[error("Extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("Extraction task failed: {0}")]
    Internal(String),
}

/// Pulls a short snippet and title/author out of a document.
///
/// Cheap to clone, so the orchestrator can hand copies to prefetch tasks.
#[derive(Clone)]
pub struct MetadataProbe {
    extractor: Arc<dyn TextExtractor>,
    documents: Arc<dyn DocumentStore>,
    timeout: Duration,
    max_snippet_chars: usize,
}

impl MetadataProbe {
    pub fn new(extractor: Arc<dyn TextExtractor>, documents: Arc<dyn DocumentStore>) -> Self {
        MetadataProbe {
            extractor,
            documents,
            timeout: DEFAULT_EXTRACTION_TIMEOUT,
            max_snippet_chars: DEFAULT_MAX_SNIPPET_CHARS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_snippet_chars(mut self, max: usize) -> Self {
        self.max_snippet_chars = max;
        self
    }

    /// Reads the document's bytes and extracts its first page, bounded by the probe timeout.
    ///
    /// Title and author prefer what the extractor found and fall back to the values cached on
    /// the document.
    #[instrument(skip(self, document), fields(document = %document.id))]
    pub async fn probe(&self, document: &Document) -> Result<ProbeResult, ExtractionError> {
        let work = async {
            let bytes = self.documents.read_content(&document.id).await?;
            self.extractor.extract_first_page(bytes).await
        };
        let extracted = tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| ExtractionError::Timeout(self.timeout))??;

        let result = ProbeResult {
            snippet: make_snippet(&extracted.text, self.max_snippet_chars),
            title: non_blank(extracted.title).or_else(|| non_blank(document.cached_title.clone())),
            author: non_blank(extracted.author).or_else(|| non_blank(document.cached_author.clone())),
        };
        debug!(
            snippet_chars = result.snippet.chars().count(),
            title = result.title.as_deref(),
            "Probe finished"
        );
        Ok(result)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Collapses runs of whitespace and truncates to `max_chars` characters.
pub fn make_snippet(text: &str, max_chars: usize) -> String {
    let mut snippet = String::new();
    for (i, word) in text.split_whitespace().enumerate() {
        if i > 0 {
            snippet.push(' ');
        }
        snippet.push_str(word);
        if snippet.len() >= max_chars.saturating_mul(4) {
            // Enough bytes for max_chars characters of any width.
            break;
        }
    }
    match snippet.char_indices().nth(max_chars) {
        Some((idx, _)) => snippet[..idx].trim_end().to_string(),
        None => snippet,
    }
}

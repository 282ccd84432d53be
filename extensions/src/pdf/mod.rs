//! First-page text extraction for PDF documents.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::bytes::Regex;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use zenreader_core::probe::{ExtractedText, ExtractionError, TextExtractor};

const PDF_MAGIC: &[u8] = b"%PDF-";
const PAGE_BREAK: char = '\x0C';

static TITLE_ENTRY: LazyLock<Option<Regex>> = LazyLock::new(|| info_entry("Title"));
static AUTHOR_ENTRY: LazyLock<Option<Regex>> = LazyLock::new(|| info_entry("Author"));

fn info_entry(key: &str) -> Option<Regex> {
    // Literal strings only; hex-encoded entries are skipped.
    Regex::new(&format!(r"/{}\s*\(((?:[^()\\]|\\.){{0,512}})\)", key))
        .map_err(|e| error!(key, error = %e, "Invalid info dictionary pattern"))
        .ok()
}

#[derive(Debug, Error)]
enum PdfError {
    #[error("Not a PDF file")]
    NotPdf,

    #[error("Text extraction failed: {0}")]
    Extraction(String),

    #[error("Text extraction panicked")]
    Panicked,

    #[error("Extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<PdfError> for ExtractionError {
    fn from(err: PdfError) -> Self {
        match err {
            PdfError::NotPdf => ExtractionError::Unsupported(err.to_string()),
            PdfError::Extraction(msg) => ExtractionError::Malformed(msg),
            PdfError::Panicked => ExtractionError::Malformed(err.to_string()),
            PdfError::Join(e) => ExtractionError::Internal(e.to_string()),
        }
    }
}

/// A [`TextExtractor`] for PDF files, built on `pdf-extract`.
///
/// Parsing runs on the blocking pool. Panics inside the parser (it has a few on damaged
/// fonts) are caught and reported as malformed input.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTextExtractor;

impl PdfTextExtractor {
    pub fn new() -> Self {
        PdfTextExtractor
    }
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn extract_first_page(&self, bytes: Vec<u8>) -> Result<ExtractedText, ExtractionError> {
        if !bytes.starts_with(PDF_MAGIC) {
            return Err(PdfError::NotPdf.into());
        }
        let extracted = tokio::task::spawn_blocking(move || extract_blocking(&bytes))
            .await
            .map_err(PdfError::from)??;
        debug!(
            chars = extracted.text.chars().count(),
            title = extracted.title.as_deref(),
            "Extracted first page"
        );
        Ok(extracted)
    }
}

fn extract_blocking(bytes: &[u8]) -> Result<ExtractedText, PdfError> {
    let text = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(bytes)
    })) {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!(error = %e, "PDF extraction failed");
            return Err(PdfError::Extraction(e.to_string()));
        }
        Err(_) => {
            error!("PDF extraction panicked");
            return Err(PdfError::Panicked);
        }
    };

    Ok(ExtractedText {
        text: first_page(&text).to_string(),
        title: info_value(&TITLE_ENTRY, bytes),
        author: info_value(&AUTHOR_ENTRY, bytes),
    })
}

/// `pdf-extract` separates pages with form feeds.
fn first_page(text: &str) -> &str {
    let text = text.trim_start_matches([PAGE_BREAK, '\n', '\r', ' ']);
    text.split(PAGE_BREAK).next().unwrap_or_default()
}

fn info_value(pattern: &LazyLock<Option<Regex>>, bytes: &[u8]) -> Option<String> {
    let pattern = pattern.as_ref()?;
    let raw = pattern.captures(bytes)?.get(1)?.as_bytes();
    let value = unescape_literal(raw);
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Decodes the common escapes of a PDF literal string. Octal escapes are dropped.
fn unescape_literal(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut iter = raw.iter().copied();
    while let Some(b) = iter.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match iter.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(b't') => out.push(b'\t'),
            Some(c @ (b'(' | b')' | b'\\')) => out.push(c),
            _ => {}
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

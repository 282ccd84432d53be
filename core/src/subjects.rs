//! Bibliographic subject tags, used as extra hints for the AI tier.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Subject lookup failed: {0}")]
    Request(String),

    #[error("Subject lookup returned an unexpected response: {0}")]
    InvalidResponse(String),
}

/// Looks up catalogue subjects for a book title.
///
/// Callers treat any error as "no tags".
#[async_trait]
pub trait SubjectLookup: Send + Sync {
    async fn subjects(&self, title: &str) -> Result<Vec<String>, LookupError>;
}

/// Turns a filename-ish title into something a catalogue search can use: drops a `.pdf`
/// suffix, replaces `_` and `-` with spaces and collapses whitespace.
///
/// Returns `None` when fewer than three characters remain.
pub fn clean_title(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let stem = match trimmed.len().checked_sub(4) {
        Some(cut) if trimmed.is_char_boundary(cut) && trimmed[cut..].eq_ignore_ascii_case(".pdf") => {
            &trimmed[..cut]
        }
        _ => trimmed,
    };
    let cleaned = stem
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    (cleaned.chars().count() >= 3).then_some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_filename_style_titles() {
        assert_eq!(clean_title("the_hobbit-1937.pdf").as_deref(), Some("the hobbit 1937"));
        assert_eq!(clean_title("  Dune  Messiah.PDF ").as_deref(), Some("Dune Messiah"));
        assert_eq!(clean_title("War and Peace").as_deref(), Some("War and Peace"));
    }

    #[test]
    fn short_titles_are_skipped() {
        assert_eq!(clean_title("ab.pdf"), None);
        assert_eq!(clean_title("_-_"), None);
        assert_eq!(clean_title(".pdf"), None);
    }
}

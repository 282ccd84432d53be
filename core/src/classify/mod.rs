//! Classification tiers and the contract for the external (AI) classifier.
//!
//! The orchestrator tries tiers in policy order: [`Tier::Local`] looks at the filename with
//! [`LocalHeuristicClassifier`], [`Tier::Metadata`] re-runs the same rules against an
//! extracted title, and [`Tier::Ai`] asks an [`ExternalClassifier`]. Only the last one can
//! report that a shared request quota has been used up, see [`is_quota_exceeded`].

pub use self::heuristic::{HeuristicRule, LocalHeuristicClassifier};

mod heuristic;

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Local,
    Metadata,
    Ai,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::Local => "local",
            Tier::Metadata => "metadata",
            Tier::Ai => "ai",
        })
    }
}

/// The outcome of classifying one document. Only `category` outlives the run, as a folder
/// assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: String,
    pub confidence: f32,
    pub reason: String,
    pub tier: Tier,
}

impl ClassificationResult {
    /// Builds a result, clamping `confidence` into `[0, 1]`. A NaN confidence becomes 0.
    pub fn new(
        category: impl Into<String>,
        confidence: f32,
        reason: impl Into<String>,
        tier: Tier,
    ) -> Self {
        let confidence = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };
        ClassificationResult {
            category: category.into(),
            confidence,
            reason: reason.into(),
            tier,
        }
    }
}

/// Everything an external classifier gets to see about a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassificationRequest {
    pub filename: String,
    pub snippet: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    /// Bibliographic subject tags (e.g. from a catalogue lookup).
    pub subject_tags: Vec<String>,
    /// Names of folders that already exist. Providers may steer results toward these.
    pub known_folders: Vec<String>,
}

impl ClassificationRequest {
    pub fn new(filename: impl Into<String>) -> Self {
        ClassificationRequest {
            filename: filename.into(),
            ..Default::default()
        }
    }

    /// Sets the snippet, truncated to at most `max_chars` characters. Blank snippets are dropped.
    pub fn with_snippet(mut self, snippet: impl AsRef<str>, max_chars: usize) -> Self {
        let snippet = snippet.as_ref().trim();
        self.snippet = if snippet.is_empty() {
            None
        } else {
            Some(snippet.chars().take(max_chars).collect())
        };
        self
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_author(mut self, author: Option<String>) -> Self {
        self.author = author.filter(|a| !a.trim().is_empty());
        self
    }

    /// Sets subject tags, keeping at most `max_tags` non-blank entries.
    pub fn with_subject_tags(mut self, tags: impl IntoIterator<Item = String>, max_tags: usize) -> Self {
        self.subject_tags = tags
            .into_iter()
            .filter(|t| !t.trim().is_empty())
            .take(max_tags)
            .collect();
        self
    }

    pub fn with_known_folders(mut self, folders: Vec<String>) -> Self {
        self.known_folders = folders;
        self
    }
}

/// A remote, rate-limited classification service.
///
/// Implementations should report rate limiting as [`ClassifyError::QuotaExceeded`] where they
/// can recognise it. The orchestrator re-checks every error with [`is_quota_exceeded`], so a
/// provider that only surfaces e.g. an HTTP 429 inside [`ClassifyError::Api`] is still handled.
#[async_trait]
pub trait ExternalClassifier: Send + Sync {
    async fn classify(&self, request: &ClassificationRequest) -> Result<ClassificationResult, ClassifyError>;

    /// A short name for logs.
    fn name(&self) -> &str {
        "external"
    }
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("Quota exceeded: {message}")]
    QuotaExceeded {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Network error: {0}")]
    Network(#[source] Box<dyn StdError + Send + Sync>),

    #[error("API error (status {status:?}): {message}")]
    Api { status: Option<u16>, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Classification timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Classifier error: {0}")]
    Provider(#[source] Box<dyn StdError + Send + Sync>),
}

const QUOTA_MARKERS: &[&str] = &[
    "resource_exhausted",
    "resource exhausted",
    "quota",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "too many requests",
];

fn mentions_quota(text: &str) -> bool {
    let text = text.to_lowercase();
    QUOTA_MARKERS.iter().any(|m| text.contains(m))
}

/// Decides whether `error` means the shared request quota is exhausted.
///
/// Checks, in order: the typed variant, an HTTP 429 status, and quota wording anywhere in the
/// message or its source chain.
pub fn is_quota_exceeded(error: &ClassifyError) -> bool {
    match error {
        ClassifyError::QuotaExceeded { .. } => return true,
        ClassifyError::Api { status: Some(429), .. } => return true,
        ClassifyError::Api { message, .. } | ClassifyError::InvalidResponse(message) => {
            if mentions_quota(message) {
                return true;
            }
        }
        ClassifyError::Timeout(_) | ClassifyError::Configuration(_) => return false,
        ClassifyError::Network(_) | ClassifyError::Provider(_) => {}
    }

    let mut source = error.source();
    while let Some(err) = source {
        if mentions_quota(&err.to_string()) {
            return true;
        }
        source = err.source();
    }
    false
}

/// Suggested wait carried by a quota error, if the provider sent one.
pub fn retry_after(error: &ClassifyError) -> Option<Duration> {
    match error {
        ClassifyError::QuotaExceeded { retry_after, .. } => *retry_after,
        _ => None,
    }
}

/// A classifier call folded into the three cases the orchestrator distinguishes.
#[derive(Debug)]
pub enum ClassifyOutcome {
    Classified(ClassificationResult),
    QuotaExceeded { retry_after: Option<Duration> },
    Failed(ClassifyError),
}

impl From<Result<ClassificationResult, ClassifyError>> for ClassifyOutcome {
    fn from(result: Result<ClassificationResult, ClassifyError>) -> Self {
        match result {
            Ok(r) => ClassifyOutcome::Classified(r),
            Err(e) if is_quota_exceeded(&e) => ClassifyOutcome::QuotaExceeded {
                retry_after: retry_after(&e),
            },
            Err(e) => ClassifyOutcome::Failed(e),
        }
    }
}

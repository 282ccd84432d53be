//! Subject tags from the Open Library search API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, trace};
use url::Url;

use zenreader_core::subjects::{LookupError, SubjectLookup};

const DEFAULT_BASE_URL: &str = "https://openlibrary.org";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_SUBJECTS: usize = 5;

#[derive(Debug, Error)]
pub enum OpenLibraryError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Open Library returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("Failed to parse search response: {0}")]
    ResponseParsing(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<OpenLibraryError> for LookupError {
    fn from(err: OpenLibraryError) -> Self {
        match err {
            OpenLibraryError::ResponseParsing(_) => LookupError::InvalidResponse(err.to_string()),
            _ => LookupError::Request(err.to_string()),
        }
    }
}

#[derive(Deserialize, Debug)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<SearchDoc>,
}

#[derive(Deserialize, Debug)]
struct SearchDoc {
    #[serde(default)]
    subject: Vec<String>,
}

fn parse_subjects(body: &str, max: usize) -> Result<Vec<String>, OpenLibraryError> {
    let response: SearchResponse = serde_json::from_str(body)?;
    Ok(response
        .docs
        .into_iter()
        .next()
        .map(|doc| doc.subject.into_iter().take(max).collect())
        .unwrap_or_default())
}

/// A [`SubjectLookup`] that asks Open Library for the best title match and returns its
/// subjects.
#[derive(Debug, Clone)]
pub struct OpenLibraryClient {
    http_client: Client,
    base_url: Url,
    max_subjects: usize,
}

impl OpenLibraryClient {
    pub fn new() -> Result<Self, OpenLibraryError> {
        let http_client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| OpenLibraryError::InvalidConfiguration(format!("Failed to build HTTP client: {}", e)))?;
        Self::with_client(http_client, DEFAULT_BASE_URL)
    }

    pub fn with_client(http_client: Client, base_url: &str) -> Result<Self, OpenLibraryError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| OpenLibraryError::InvalidConfiguration(format!("Invalid base URL '{}': {}", base_url, e)))?;
        Ok(OpenLibraryClient {
            http_client,
            base_url,
            max_subjects: DEFAULT_MAX_SUBJECTS,
        })
    }

    #[must_use]
    pub fn max_subjects(mut self, max: usize) -> Self {
        self.max_subjects = max;
        self
    }

    fn search_url(&self, title: &str) -> Result<Url, OpenLibraryError> {
        let mut url = self
            .base_url
            .join("search.json")
            .map_err(|e| OpenLibraryError::InvalidConfiguration(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("title", title)
            .append_pair("limit", "1");
        Ok(url)
    }

    #[instrument(skip(self))]
    pub async fn search_subjects(&self, title: &str) -> Result<Vec<String>, OpenLibraryError> {
        let url = self.search_url(title)?;
        trace!(%url, "Open Library search");
        let response = self.http_client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(OpenLibraryError::Status(response.status()));
        }
        let body = response.text().await?;
        let subjects = parse_subjects(&body, self.max_subjects)?;
        debug!(count = subjects.len(), "Open Library subjects");
        Ok(subjects)
    }
}

#[async_trait]
impl SubjectLookup for OpenLibraryClient {
    async fn subjects(&self, title: &str) -> Result<Vec<String>, LookupError> {
        self.search_subjects(title).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_subjects_of_first_hit() {
        let body = r#"{
            "numFound": 2,
            "docs": [
                {"title": "The Hobbit", "subject": ["Fantasy", "Dragons", "Dwarves", "Wizards", "Quests", "Maps"]},
                {"title": "Other", "subject": ["Cooking"]}
            ]
        }"#;
        let subjects = parse_subjects(body, 5).unwrap();
        assert_eq!(subjects, vec!["Fantasy", "Dragons", "Dwarves", "Wizards", "Quests"]);
    }

    #[test]
    fn no_hits_or_no_subjects_yield_nothing() {
        assert!(parse_subjects(r#"{"numFound": 0, "docs": []}"#, 5).unwrap().is_empty());
        assert!(parse_subjects(r#"{"docs": [{"title": "Bare"}]}"#, 5).unwrap().is_empty());
    }

    #[test]
    fn malformed_body_is_invalid_response() {
        let err: LookupError = parse_subjects("<html>", 5).unwrap_err().into();
        assert!(matches!(err, LookupError::InvalidResponse(_)));
    }

    #[test]
    fn search_url_encodes_title() {
        let client = OpenLibraryClient::with_client(Client::new(), "http://localhost:9000/").unwrap();
        let url = client.search_url("dune messiah & co").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9000/search.json?title=dune+messiah+%26+co&limit=1"
        );
    }
}

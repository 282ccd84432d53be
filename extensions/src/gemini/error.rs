use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use zenreader_core::classify::ClassifyError;

// ============== Gemini API error body ==============

/// The error envelope returned by the Gemini API.
#[derive(Deserialize, Debug, Clone)]
pub struct GeminiErrorResponse {
    pub error: GeminiErrorDetail,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GeminiErrorDetail {
    pub code: u16,
    pub message: String,
    /// e.g. "INVALID_ARGUMENT", "RESOURCE_EXHAUSTED".
    pub status: String,
    /// `google.rpc` detail objects. `RetryInfo` carries the suggested wait on quota errors.
    #[serde(default)]
    pub details: Vec<serde_json::Value>,
}

impl GeminiErrorDetail {
    /// The `retryDelay` of a `RetryInfo` detail, e.g. `"17s"`.
    pub fn retry_delay(&self) -> Option<Duration> {
        self.details.iter().find_map(|detail| {
            let delay = detail.get("retryDelay")?.as_str()?;
            parse_duration_secs(delay)
        })
    }
}

fn parse_duration_secs(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().strip_suffix('s')?.parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

// ============== Internal error ==============

/// Everything that can go wrong inside the Gemini client. Converted to
/// [`ClassifyError`] at the trait boundary.
#[derive(Error, Debug)]
pub enum GeminiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Failed to serialize request body: {0}")]
    RequestSerialization(#[source] serde_json::Error),

    #[error("Failed to parse response body ({context}): {source}")]
    ResponseParsing {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Gemini API error: status={status}, message='{body_text}'")]
    ApiError {
        status: StatusCode,
        detail: Option<GeminiErrorDetail>,
        body_text: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl GeminiError {
    /// Whether the API said the caller is over its request quota.
    pub fn is_quota_exceeded(&self) -> bool {
        match self {
            GeminiError::ApiError { status, detail, body_text } => quota_signalled(*status, detail, body_text),
            _ => false,
        }
    }
}

fn quota_signalled(status: StatusCode, detail: &Option<GeminiErrorDetail>, body_text: &str) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || detail.as_ref().is_some_and(|d| d.status == "RESOURCE_EXHAUSTED")
        || body_text.contains("RESOURCE_EXHAUSTED")
}

/// Turns a non-success status and its body into a [`GeminiError::ApiError`], parsing the
/// Gemini error envelope when the body has one.
pub(crate) fn api_error(status: StatusCode, body_text: String) -> GeminiError {
    let detail = match serde_json::from_str::<GeminiErrorResponse>(&body_text) {
        Ok(parsed) => Some(parsed.error),
        Err(e) => {
            warn!(status = %status, error = %e, "Failed to parse Gemini error response JSON");
            None
        }
    };
    GeminiError::ApiError { status, detail, body_text }
}

/// Reads the body of a failed response into a [`GeminiError`].
pub(crate) async fn map_response_error(response: reqwest::Response) -> GeminiError {
    let status = response.status();
    match response.text().await {
        Ok(body_text) => api_error(status, body_text),
        Err(e) => {
            warn!(status = %status, error = %e, "Failed to read Gemini error response body");
            GeminiError::Network(e)
        }
    }
}

// ============== From<GeminiError> for ClassifyError ==============

impl From<GeminiError> for ClassifyError {
    fn from(err: GeminiError) -> Self {
        match err {
            GeminiError::ApiError { status, detail, body_text } if quota_signalled(status, &detail, &body_text) => {
                let retry_after = detail.as_ref().and_then(GeminiErrorDetail::retry_delay);
                let message = detail.map(|d| d.message).unwrap_or(body_text);
                ClassifyError::QuotaExceeded { message, retry_after }
            }
            GeminiError::ApiError { status, detail, body_text } => {
                let message = detail
                    .map(|d| format!("{} (Status: {}, Code: {})", d.message, d.status, d.code))
                    .unwrap_or(body_text);
                match status {
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClassifyError::Configuration(message),
                    _ => ClassifyError::Api {
                        status: Some(status.as_u16()),
                        message,
                    },
                }
            }
            GeminiError::Network(source) => ClassifyError::Network(Box::new(source)),
            GeminiError::RequestSerialization(source) => ClassifyError::Provider(Box::new(source)),
            GeminiError::ResponseParsing { context, source } => {
                ClassifyError::InvalidResponse(format!("{}: {}", context, source))
            }
            GeminiError::InvalidConfiguration(msg) => ClassifyError::Configuration(msg),
            GeminiError::UnexpectedResponse(msg) => ClassifyError::InvalidResponse(msg),
        }
    }
}

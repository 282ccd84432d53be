use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, instrument, trace};

use zenreader_core::classify::{
    ClassificationRequest, ClassificationResult, ClassifyError, ExternalClassifier, Tier,
};

use super::error::{map_response_error, GeminiError};
use super::shared::{GeminiConfig, SharedGeminiClient};

pub const DEFAULT_MODEL: &str = "gemini-flash-lite-latest";

const SYSTEM_INSTRUCTION: &str = "You sort a personal library of documents into folders. \
Given what is known about one document, answer with a short, general category name \
(one or two words, Title Case, e.g. \"Finance\", \"Science Fiction\", \"Cooking\"). \
Prefer one of the existing folders when it fits. Do not invent nested paths.";

// ============== Request/response structs ==============

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    system_instruction: Content,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    candidate_count: u32,
    response_mime_type: &'static str,
    response_schema: serde_json::Value,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// The JSON object the model is asked to produce.
#[derive(Deserialize, Debug)]
struct RawClassification {
    category: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    reason: Option<String>,
}

fn response_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "category": { "type": "STRING", "description": "Folder name for the document" },
            "confidence": { "type": "NUMBER", "description": "Between 0 and 1" },
            "reason": { "type": "STRING", "description": "One short sentence" }
        },
        "required": ["category", "confidence", "reason"],
        "propertyOrdering": ["category", "confidence", "reason"]
    })
}

/// Renders everything known about the document as the user turn of the prompt.
fn build_prompt(request: &ClassificationRequest) -> String {
    let mut prompt = format!("Filename: {}\n", request.filename);
    if let Some(title) = &request.title {
        prompt.push_str(&format!("Title: {}\n", title));
    }
    if let Some(author) = &request.author {
        prompt.push_str(&format!("Author: {}\n", author));
    }
    if !request.subject_tags.is_empty() {
        prompt.push_str(&format!("Catalogue subjects: {}\n", request.subject_tags.join(", ")));
    }
    if let Some(snippet) = &request.snippet {
        prompt.push_str(&format!("First page excerpt:\n\"\"\"\n{}\n\"\"\"\n", snippet));
    }
    if !request.known_folders.is_empty() {
        prompt.push_str(&format!("Existing folders: {}\n", request.known_folders.join(", ")));
    }
    prompt
}

/// Extracts the classification from a raw `generateContent` response body.
fn parse_response(raw_body: &str) -> Result<ClassificationResult, GeminiError> {
    let response: GenerateResponse =
        serde_json::from_str(raw_body).map_err(|e| GeminiError::ResponseParsing {
            context: "generateContent response".to_string(),
            source: e,
        })?;

    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(GeminiError::UnexpectedResponse(format!("Prompt blocked: {}", reason)));
    }
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| GeminiError::UnexpectedResponse("No candidates in response".to_string()))?;
    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(GeminiError::UnexpectedResponse(format!(
            "Empty candidate (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    let json_text = strip_code_fence(&text);
    let raw: RawClassification =
        serde_json::from_str(json_text).map_err(|e| GeminiError::ResponseParsing {
            context: "classification JSON".to_string(),
            source: e,
        })?;
    if raw.category.trim().is_empty() {
        return Err(GeminiError::UnexpectedResponse("Model returned an empty category".to_string()));
    }

    Ok(ClassificationResult::new(
        raw.category.trim(),
        raw.confidence.unwrap_or(0.5),
        raw.reason.unwrap_or_default(),
        Tier::Ai,
    ))
}

/// Models occasionally wrap JSON output in a Markdown fence despite the response MIME type.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    }
}

/// An [`ExternalClassifier`] backed by Gemini's `generateContent` endpoint with a JSON
/// response schema.
#[derive(Debug, Clone)]
pub struct GeminiClassifier {
    shared_client: Arc<SharedGeminiClient>,
    model_id: String,
    temperature: f32,
}

impl GeminiClassifier {
    pub fn new(api_key: impl Into<String>) -> Result<Self, GeminiError> {
        Self::with_config(GeminiConfig::new(api_key)?, None)
    }

    pub fn with_config(config: GeminiConfig, client_override: Option<Client>) -> Result<Self, GeminiError> {
        let shared_client = SharedGeminiClient::new(config, client_override)?;
        Ok(GeminiClassifier {
            shared_client: Arc::new(shared_client),
            model_id: DEFAULT_MODEL.to_string(),
            temperature: 0.1,
        })
    }

    #[must_use]
    pub fn model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, request: &ClassificationRequest) -> Result<ClassificationResult, GeminiError> {
        let url = self
            .shared_client
            .build_url(&format!("models/{}:generateContent", self.model_id))?;

        let body = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(build_prompt(request)),
                }],
            }],
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: Some(SYSTEM_INSTRUCTION.to_string()),
                }],
            },
            generation_config: GenerationConfig {
                temperature: self.temperature,
                candidate_count: 1,
                response_mime_type: "application/json",
                response_schema: response_schema(),
            },
        };
        let request_json = serde_json::to_string(&body).map_err(|e| {
            error!(error = %e, "Failed to serialize Gemini request body");
            GeminiError::RequestSerialization(e)
        })?;
        trace!(body = %request_json, "Gemini request body");

        let response = self
            .shared_client
            .http_client()
            .post(url)
            .header("x-goog-api-key", self.shared_client.config().api_key.expose_secret())
            .header("Content-Type", "application/json")
            .body(request_json)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            debug!(%status, "Gemini API returned error status");
            return Err(map_response_error(response).await);
        }

        let raw_body = response.text().await?;
        trace!(body = %raw_body, "Gemini response body");
        parse_response(&raw_body)
    }
}

#[async_trait]
impl ExternalClassifier for GeminiClassifier {
    #[instrument(skip(self, request), fields(model = %self.model_id, filename = %request.filename))]
    async fn classify(&self, request: &ClassificationRequest) -> Result<ClassificationResult, ClassifyError> {
        let result = self.generate(request).await;
        match &result {
            Ok(r) => debug!(category = %r.category, confidence = r.confidence, "Gemini classified document"),
            Err(e) if e.is_quota_exceeded() => debug!("Gemini quota exceeded"),
            Err(e) => debug!(error = %e, "Gemini classification failed"),
        }
        result.map_err(Into::into)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

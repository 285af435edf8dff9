//! Summarization client.
//!
//! [`Summarizer`] is the narrow seam the session depends on: one call
//! that turns an encoded frame into a description, one that folds the
//! collected descriptions into a final summary. [`GeminiClient`] is the
//! production implementation, speaking the `generateContent` REST API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stream_recap_common::config::SummarizerConfig;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("failed to create HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("summarization request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("summarization service returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("summarization service returned no text")]
    EmptyReply,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Describes a single base64-encoded JPEG frame in natural language.
    async fn describe_frame(&self, image_base64: &str) -> Result<String, SummarizeError>;

    /// Folds the per-frame summaries, in capture order, into one final
    /// summary. Callers only invoke this with at least one summary.
    async fn summarize_moments(&self, summaries: &[String]) -> Result<String, SummarizeError>;
}

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    frame_prompt: String,
    recap_prompt: String,
}

impl GeminiClient {
    pub fn new(config: &SummarizerConfig) -> Result<Self, SummarizeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(SummarizeError::Client)?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            frame_prompt: config.frame_prompt.clone(),
            recap_prompt: config.recap_prompt.clone(),
        })
    }

    async fn generate(&self, parts: Vec<Part>) -> Result<String, SummarizeError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let request = GenerateRequest {
            contents: vec![Content { parts }],
        };

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = api_error_message(&body);
            warn!(status = status.as_u16(), message = %message, "summarization request rejected");
            return Err(SummarizeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let reply: GenerateResponse = response.json().await?;
        first_candidate_text(&reply).ok_or(SummarizeError::EmptyReply)
    }
}

#[async_trait]
impl Summarizer for GeminiClient {
    async fn describe_frame(&self, image_base64: &str) -> Result<String, SummarizeError> {
        debug!(model = %self.model, "describing frame");
        let text = self
            .generate(vec![
                Part::jpeg(image_base64),
                Part::text(&self.frame_prompt),
            ])
            .await?;
        info!(chars = text.len(), "frame described");
        Ok(text)
    }

    async fn summarize_moments(&self, summaries: &[String]) -> Result<String, SummarizeError> {
        debug!(model = %self.model, moments = summaries.len(), "summarizing moments");
        let text = self
            .generate(vec![
                Part::text(&self.recap_prompt),
                Part::text(&numbered_listing(summaries)),
            ])
            .await?;
        info!(moments = summaries.len(), chars = text.len(), "moments summarized");
        Ok(text)
    }
}

/// Renders the per-frame summaries as a numbered list, one per line, so
/// the model sees them in capture order.
fn numbered_listing(summaries: &[String]) -> String {
    summaries
        .iter()
        .enumerate()
        .map(|(i, summary)| format!("{}. {}", i + 1, summary))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pulls the error message out of the API's JSON error envelope, falling
/// back to a truncated copy of the raw body.
fn api_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorEnvelope {
        error: ErrorBody,
    }
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        return envelope.error.message;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "no response body".to_string();
    }
    trimmed.chars().take(200).collect()
}

fn first_candidate_text(reply: &GenerateResponse) -> Option<String> {
    let candidate = reply.candidates.first()?;
    let content = candidate.content.as_ref()?;
    let text = content
        .parts
        .iter()
        .map(|part| part.text.as_str())
        .collect::<Vec<_>>()
        .join("")
        .trim()
        .to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }

    fn jpeg(base64: &str) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: "image/jpeg".to_string(),
                data: base64.to_string(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ReplyContent>,
}

#[derive(Debug, Deserialize)]
struct ReplyContent {
    #[serde(default)]
    parts: Vec<ReplyPart>,
}

#[derive(Debug, Deserialize)]
struct ReplyPart {
    #[serde(default)]
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_request_carries_inline_jpeg_and_prompt() {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part::jpeg("QUJD"), Part::text("describe this")],
            }],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "contents": [{
                    "parts": [
                        { "inline_data": { "mime_type": "image/jpeg", "data": "QUJD" } },
                        { "text": "describe this" }
                    ]
                }]
            })
        );
    }

    #[test]
    fn reply_text_is_joined_and_trimmed() {
        let reply: GenerateResponse = serde_json::from_str(
            r#"{
                "candidates": [{
                    "content": { "parts": [{ "text": "  A lecture " }, { "text": "begins." }] }
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(
            first_candidate_text(&reply),
            Some("A lecture begins.".to_string())
        );
    }

    #[test]
    fn empty_candidates_yield_no_text() {
        let reply: GenerateResponse = serde_json::from_str(r#"{ "candidates": [] }"#).unwrap();
        assert_eq!(first_candidate_text(&reply), None);

        let reply: GenerateResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(first_candidate_text(&reply), None);
    }

    #[test]
    fn whitespace_only_reply_counts_as_empty() {
        let reply: GenerateResponse = serde_json::from_str(
            r#"{ "candidates": [{ "content": { "parts": [{ "text": "   " }] } }] }"#,
        )
        .unwrap();
        assert_eq!(first_candidate_text(&reply), None);
    }

    #[test]
    fn listing_numbers_summaries_in_order() {
        let summaries = vec!["whiteboard".to_string(), "slide two".to_string()];
        assert_eq!(numbered_listing(&summaries), "1. whiteboard\n2. slide two");
    }

    #[test]
    fn api_error_message_prefers_json_envelope() {
        let body = r#"{ "error": { "code": 429, "message": "quota exceeded" } }"#;
        assert_eq!(api_error_message(body), "quota exceeded");
        assert_eq!(api_error_message("plain failure"), "plain failure");
        assert_eq!(api_error_message("  "), "no response body");
    }
}

//! Google Gemini API driver.
//!
//! Implements [`ChatProvider`] on top of the Gemini REST API:
//! `models/{model}:generateContent` for complete replies and
//! `models/{model}:streamGenerateContent?alt=sse` for streamed ones.
//! The credential travels in the `x-goog-api-key` header so it never ends
//! up in a logged URL.

use futures::StreamExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

use super::{ChatProvider, FragmentStream, GeminiSettings, Message, Role};

const API_VERSION: &str = "v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Finish reasons that mean the candidate was withheld.
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

/// Driver for the Gemini `generateContent` family of endpoints.
#[derive(Clone)]
pub struct GeminiProvider {
    http: reqwest::Client,
    settings: GeminiSettings,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("settings", &self.settings)
            .finish()
    }
}

impl GeminiProvider {
    /// Create a provider. Construction needs a resolved credential, so a
    /// missing key fails earlier, in configuration.
    pub fn new(settings: GeminiSettings) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.read_timeout)
            .build()?;
        Ok(Self { http, settings })
    }

    fn endpoint(&self, method: &str) -> Result<url::Url, ProviderError> {
        let raw = format!(
            "{}/{API_VERSION}/models/{}:{method}",
            self.settings.base_url.as_str().trim_end_matches('/'),
            self.settings.model
        );
        url::Url::parse(&raw).map_err(|e| ProviderError::Network(format!("bad endpoint {raw}: {e}")))
    }

    fn request_body<'a>(&'a self, history: &'a [Message]) -> GenerateContentRequest<'a> {
        let contents = history
            .iter()
            .map(|m| Content {
                role: Some(wire_role(m.role())),
                parts: vec![Part { text: m.text() }],
            })
            .collect();

        let system_instruction = self.settings.system_instruction.as_deref().map(|text| Content {
            role: None,
            parts: vec![Part { text }],
        });

        let generation_config = (self.settings.temperature.is_some()
            || self.settings.max_output_tokens.is_some())
        .then_some(GenerationConfig {
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
        });

        GenerateContentRequest {
            contents,
            system_instruction,
            generation_config,
        }
    }

    async fn post(
        &self,
        url: url::Url,
        body: &GenerateContentRequest<'_>,
    ) -> Result<reqwest::Response, ProviderError> {
        let resp = self
            .http
            .post(url)
            .header(API_KEY_HEADER, self.settings.credential.expose())
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(map_http_error(status, &body))
    }
}

#[async_trait::async_trait]
impl ChatProvider for GeminiProvider {
    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn complete(&self, history: &[Message]) -> Result<String, ProviderError> {
        let url = self.endpoint("generateContent")?;
        tracing::debug!(
            model = %self.settings.model,
            history_len = history.len(),
            "Sending generateContent request"
        );

        let resp = self.post(url, &self.request_body(history)).await?;
        let parsed: GenerateContentResponse = resp.json().await?;

        candidate_text(parsed)?.ok_or(ProviderError::Empty)
    }

    async fn complete_stream(&self, history: &[Message]) -> Result<FragmentStream, ProviderError> {
        let mut url = self.endpoint("streamGenerateContent")?;
        url.query_pairs_mut().append_pair("alt", "sse");
        tracing::debug!(
            model = %self.settings.model,
            history_len = history.len(),
            "Sending streamGenerateContent request"
        );

        let resp = self.post(url, &self.request_body(history)).await?;
        let byte_stream = resp.bytes_stream();

        let out = async_stream::try_stream! {
            let mut buf = Vec::<u8>::new();

            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk?;
                buf.extend_from_slice(&chunk);

                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line = buf.drain(..=pos).collect::<Vec<_>>();
                    if let Some(text) = parse_sse_line(&line)? {
                        yield text;
                    }
                }
            }

            // A final event may arrive without its trailing newline.
            if let Some(text) = parse_sse_line(&buf)? {
                yield text;
            }
        };

        Ok(Box::pin(out))
    }
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

/// Decode one SSE line. Non-data lines and data lines without text yield `None`.
fn parse_sse_line(line: &[u8]) -> Result<Option<String>, ProviderError> {
    let text = String::from_utf8_lossy(line);
    let line = text.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }

    let chunk: GenerateContentResponse = serde_json::from_str(data)?;
    candidate_text(chunk)
}

/// Text of the first candidate, or the error or reason it was withheld.
fn candidate_text(resp: GenerateContentResponse) -> Result<Option<String>, ProviderError> {
    if let Some(error) = resp.error {
        return Err(map_body_error(error));
    }
    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ProviderError::Blocked { reason });
    }

    let Some(candidate) = resp.candidates.into_iter().next() else {
        return Ok(None);
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if !text.is_empty() {
        return Ok(Some(text));
    }

    match candidate.finish_reason {
        Some(reason) if BLOCKING_FINISH_REASONS.contains(&reason.as_str()) => {
            Err(ProviderError::Blocked { reason })
        }
        _ => Ok(None),
    }
}

fn map_http_error(status: StatusCode, body: &str) -> ProviderError {
    let parsed = serde_json::from_str::<ErrorWrapper>(body).ok().map(|w| w.error);
    let api_status = parsed
        .as_ref()
        .and_then(|e| e.status.clone())
        .unwrap_or_default();
    let message = parsed
        .and_then(|e| e.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                trimmed.to_string()
            }
        });

    classify_error(status, &api_status, message)
}

/// Error object delivered inside a 200 body or an SSE event.
fn map_body_error(error: ErrorBody) -> ProviderError {
    let status = error
        .code
        .and_then(|c| StatusCode::from_u16(c).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let api_status = error.status.unwrap_or_default();
    let message = error
        .message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());

    classify_error(status, &api_status, message)
}

fn classify_error(status: StatusCode, api_status: &str, message: String) -> ProviderError {
    // Gemini reports a bad key as 400 INVALID_ARGUMENT.
    let bad_key = message.contains("API key not valid");

    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || api_status == "UNAUTHENTICATED"
        || api_status == "PERMISSION_DENIED"
        || bad_key
    {
        ProviderError::Auth {
            status: status.as_u16(),
            message,
        }
    } else if status == StatusCode::TOO_MANY_REQUESTS || api_status == "RESOURCE_EXHAUSTED" {
        ProviderError::Quota { message }
    } else {
        ProviderError::Http {
            status: status.as_u16(),
            message,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<u16>,
    message: Option<String>,
    status: Option<String>,
}

//! Gemini backend for the completion layer.
//!
//! Speaks the `generateContent` REST endpoint and maps transport, HTTP, and
//! payload-level failures onto [`CompletionError`] kinds. Retry behavior
//! belongs to [`CompletionClient`](super::CompletionClient); this backend
//! performs exactly one call per invocation.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::completion::{Completion, CompletionBackend, CompletionRequest, DEFAULT_REQUEST_TIMEOUT};
use crate::error::CompletionError;

/// Public Gemini API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// System instruction applied when a request carries none.
const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are an intelligent email processing assistant.";

/// Harm categories the API accepts safety settings for.
const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Finish reasons that mean the response was withheld.
const BLOCKED_FINISH_REASONS: [&str; 4] =
    ["SAFETY", "RECITATION", "BLOCKLIST", "PROHIBITED_CONTENT"];

/// Block threshold applied uniformly to every harm category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SafetyThreshold {
    #[default]
    BlockNone,
    BlockOnlyHigh,
    BlockMediumAndAbove,
    BlockLowAndAbove,
}

impl SafetyThreshold {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyThreshold::BlockNone => "BLOCK_NONE",
            SafetyThreshold::BlockOnlyHigh => "BLOCK_ONLY_HIGH",
            SafetyThreshold::BlockMediumAndAbove => "BLOCK_MEDIUM_AND_ABOVE",
            SafetyThreshold::BlockLowAndAbove => "BLOCK_LOW_AND_ABOVE",
        }
    }
}

/// Gemini backend configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
    pub safety_threshold: SafetyThreshold,
    /// HTTP-level timeout for a single call.
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            api_key,
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            safety_threshold: SafetyThreshold::default(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_safety_threshold(mut self, threshold: SafetyThreshold) -> Self {
        self.safety_threshold = threshold;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Backend speaking the Gemini `generateContent` API.
pub struct GeminiBackend {
    config: GeminiConfig,
    client: Client,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CompletionError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self { config, client })
    }

    fn build_body<'a>(&'a self, request: &'a CompletionRequest) -> GenerateContentRequest<'a> {
        let instruction = request
            .system_instruction
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_INSTRUCTION);
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: &request.prompt,
                }],
            }],
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part { text: instruction }],
            }),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                top_p: request.top_p,
                max_output_tokens: request.max_output_tokens,
            },
            safety_settings: HARM_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category,
                    threshold: self.config.safety_threshold.as_str(),
                })
                .collect(),
        }
    }

    fn classify_transport_error(&self, error: reqwest::Error) -> CompletionError {
        if error.is_timeout() {
            CompletionError::Timeout(self.config.timeout)
        } else {
            CompletionError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl CompletionBackend for GeminiBackend {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn generate(
        &self,
        request: &CompletionRequest,
    ) -> Result<Completion, CompletionError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url, self.config.model
        );
        let body = self.build_body(request);

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.config.api_key.expose_secret())])
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let decoded: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Network(format!("invalid response body: {e}")))?;

        extract_completion(decoded)
    }
}

fn classify_status(status: StatusCode, detail: &str) -> CompletionError {
    let message = format!("{status}: {}", detail.trim());
    match status {
        StatusCode::TOO_MANY_REQUESTS => CompletionError::RateLimited(message),
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            CompletionError::MalformedRequest(message)
        }
        _ => CompletionError::Network(message),
    }
}

/// Map a decoded response onto a completion or a failure.
///
/// A prompt-level block or a withheld candidate is a safety failure. A
/// response with no candidates and no block signal is an empty success.
fn extract_completion(response: GenerateContentResponse) -> Result<Completion, CompletionError> {
    if let Some(feedback) = &response.prompt_feedback
        && let Some(reason) = &feedback.block_reason
    {
        return Err(CompletionError::SafetyBlocked(format!(
            "prompt blocked: {reason}"
        )));
    }

    let (input_tokens, output_tokens) = response
        .usage_metadata
        .map(|u| (u.prompt_token_count, u.candidates_token_count))
        .unwrap_or((0, 0));

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Ok(Completion {
            text: String::new(),
            input_tokens,
            output_tokens,
        });
    };

    let text: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    // Candidate text takes precedence over the finish reason; only a
    // withheld (empty) candidate counts as blocked.
    if text.trim().is_empty()
        && let Some(reason) = &candidate.finish_reason
        && BLOCKED_FINISH_REASONS.contains(&reason.as_str())
    {
        return Err(CompletionError::SafetyBlocked(format!(
            "response blocked: {reason}"
        )));
    }

    Ok(Completion {
        text: text.trim().to_string(),
        input_tokens,
        output_tokens,
    })
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_backend(server: &MockServer) -> GeminiBackend {
        let config = GeminiConfig::new(SecretString::from("test-key"), "gemini-1.5-flash")
            .with_base_url(server.uri());
        GeminiBackend::new(config).unwrap()
    }

    fn candidate_body(text: &str) -> serde_json::Value {
        json!({
            "candidates": [{
                "content": {"parts": [{"text": text}], "role": "model"},
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 12,
                "candidatesTokenCount": 4,
                "totalTokenCount": 16
            }
        })
    }

    async fn mount_success(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-flash:generateContent"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn success_returns_trimmed_text_and_usage() {
        let server = MockServer::start().await;
        mount_success(&server, candidate_body("  Meeting Request\n")).await;
        let backend = test_backend(&server);

        let completion = backend
            .generate(&CompletionRequest::new("categorize"))
            .await
            .unwrap();

        assert_eq!(completion.text, "Meeting Request");
        assert_eq!(completion.input_tokens, 12);
        assert_eq!(completion.output_tokens, 4);
    }

    #[tokio::test]
    async fn request_body_carries_generation_config_and_safety() {
        let server = MockServer::start().await;
        mount_success(&server, candidate_body("General")).await;
        let backend = test_backend(&server);

        let request = CompletionRequest::new("categorize this email")
            .with_temperature(0.8)
            .with_max_output_tokens(50);
        backend.generate(&request).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();

        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "categorize this email");
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            DEFAULT_SYSTEM_INSTRUCTION
        );
        assert_eq!(body["generationConfig"]["temperature"], 0.8);
        assert_eq!(body["generationConfig"]["topP"], 0.95);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 50);

        let safety = body["safetySettings"].as_array().unwrap();
        assert_eq!(safety.len(), HARM_CATEGORIES.len());
        assert!(safety.iter().all(|s| s["threshold"] == "BLOCK_NONE"));
    }

    #[tokio::test]
    async fn multiple_parts_are_joined() {
        let server = MockServer::start().await;
        let body = json!({
            "candidates": [{
                "content": {"parts": [{"text": "Hello "}, {"text": "world"}]}
            }]
        });
        mount_success(&server, body).await;
        let backend = test_backend(&server);

        let completion = backend
            .generate(&CompletionRequest::new("hi"))
            .await
            .unwrap();

        assert_eq!(completion.text, "Hello world");
    }

    #[tokio::test]
    async fn http_429_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
            .mount(&server)
            .await;
        let backend = test_backend(&server);

        let err = backend
            .generate(&CompletionRequest::new("hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, CompletionError::RateLimited(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn http_400_and_403_map_to_malformed_request() {
        for code in [400u16, 401, 403] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(code).set_body_string("bad key"))
                .mount(&server)
                .await;
            let backend = test_backend(&server);

            let err = backend
                .generate(&CompletionRequest::new("hi"))
                .await
                .unwrap_err();

            assert!(matches!(err, CompletionError::MalformedRequest(_)), "code {code}");
            assert!(!err.is_retryable());
        }
    }

    #[tokio::test]
    async fn http_500_maps_to_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
            .mount(&server)
            .await;
        let backend = test_backend(&server);

        let err = backend
            .generate(&CompletionRequest::new("hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, CompletionError::Network(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn prompt_block_maps_to_safety_blocked() {
        let server = MockServer::start().await;
        mount_success(
            &server,
            json!({"promptFeedback": {"blockReason": "SAFETY"}, "candidates": []}),
        )
        .await;
        let backend = test_backend(&server);

        let err = backend
            .generate(&CompletionRequest::new("hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, CompletionError::SafetyBlocked(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn withheld_candidate_maps_to_safety_blocked() {
        let server = MockServer::start().await;
        mount_success(
            &server,
            json!({"candidates": [{"finishReason": "SAFETY"}]}),
        )
        .await;
        let backend = test_backend(&server);

        let err = backend
            .generate(&CompletionRequest::new("hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, CompletionError::SafetyBlocked(_)));
    }

    #[tokio::test]
    async fn candidate_text_wins_over_finish_reason() {
        let server = MockServer::start().await;
        mount_success(
            &server,
            json!({
                "candidates": [{
                    "content": {"parts": [{"text": "Spam"}]},
                    "finishReason": "SAFETY"
                }]
            }),
        )
        .await;
        let backend = test_backend(&server);

        let completion = backend
            .generate(&CompletionRequest::new("hi"))
            .await
            .unwrap();

        assert_eq!(completion.text, "Spam");
    }

    #[tokio::test]
    async fn no_candidates_is_an_empty_success() {
        let server = MockServer::start().await;
        mount_success(&server, json!({"candidates": []})).await;
        let backend = test_backend(&server);

        let completion = backend
            .generate(&CompletionRequest::new("hi"))
            .await
            .unwrap();

        assert!(completion.text.is_empty());
    }

    #[tokio::test]
    async fn undecodable_body_maps_to_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;
        let backend = test_backend(&server);

        let err = backend
            .generate(&CompletionRequest::new("hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, CompletionError::Network(_)));
    }
}

//! Language model client
//!
//! The orchestrator talks to models only through [`LanguageModel`]. The
//! production implementation calls an OpenAI-compatible chat completions
//! endpoint with a long-lived reqwest::Client for connection pooling.

use crate::config::LlmConfig;
use crate::error::{GenerationFailureKind, OrchestrationError};
use crate::models::{ChatMessage, ChatRole};
use crate::Result;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info};

lazy_static! {
    static ref SECRET_TOKEN: Regex = Regex::new(r"sk-[A-Za-z0-9_\-]{6,}").unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;
}

/// Per-call generation parameters shared by every model call of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl GenerationSettings {
    pub fn request(&self, messages: Vec<ChatMessage>) -> CompletionRequest {
        CompletionRequest {
            messages,
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Complete `messages` under the configured deadline.
    pub async fn complete(&self, model: &dyn LanguageModel, messages: Vec<ChatMessage>) -> Result<Completion> {
        complete_with_timeout(model, self.request(messages), self.timeout).await
    }
}

impl From<&LlmConfig> for GenerationSettings {
    fn from(config: &LlmConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: config.timeout,
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::from(&LlmConfig::default())
    }
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Run a completion under a deadline. Expiry is a retryable `Timeout`.
pub async fn complete_with_timeout(
    model: &dyn LanguageModel,
    request: CompletionRequest,
    timeout: Duration,
) -> Result<Completion> {
    match tokio::time::timeout(timeout, model.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(OrchestrationError::generation(
            GenerationFailureKind::Timeout,
            format!("model did not answer within {}s", timeout.as_secs_f32()),
        )),
    }
}

/// Strip the configured key and anything shaped like `sk-...` from a message.
pub fn redact(message: &str, api_key: Option<&str>) -> String {
    let mut out = message.to_string();
    if let Some(key) = api_key.filter(|k| k.len() >= 4) {
        out = out.replace(key, "***");
    }
    SECRET_TOKEN.replace_all(&out, "sk-***").into_owned()
}

//
// ================= OpenAI-compatible client =================
//

/// Reusable chat completions client (connection-pooled)
pub struct OpenAiChatClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| OrchestrationError::ConfigError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn scrub(&self, message: &str) -> String {
        redact(message, self.api_key.as_deref())
    }

    fn fail(&self, kind: GenerationFailureKind, message: impl AsRef<str>) -> OrchestrationError {
        OrchestrationError::generation(kind, self.scrub(message.as_ref()))
    }
}

#[async_trait::async_trait]
impl LanguageModel for OpenAiChatClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(self.fail(
                GenerationFailureKind::Authentication,
                "API key not configured (set OPENAI_API_KEY or provide API.txt)",
            ));
        };

        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionsRequest {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: role_name(m.role),
                    content: &m.content,
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        info!(model = %request.model, messages = request.messages.len(), "Calling chat completions API");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    GenerationFailureKind::Timeout
                } else {
                    GenerationFailureKind::Transient
                };
                let err = self.fail(kind, format!("request failed: {}", e));
                error!(error = %err, "Chat completions request failed");
                err
            })?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| self.fail(GenerationFailureKind::Transient, format!("failed to read body: {}", e)))?;

        if !status.is_success() {
            let kind = match status.as_u16() {
                401 | 403 => GenerationFailureKind::Authentication,
                429 => GenerationFailureKind::RateLimited,
                s if s >= 500 => GenerationFailureKind::Transient,
                _ => GenerationFailureKind::InvalidResponse,
            };
            let detail = serde_json::from_str::<ErrorEnvelope>(&raw)
                .map(|e| e.error.message)
                .unwrap_or(raw);
            let err = self.fail(kind, format!("HTTP {}: {}", status.as_u16(), detail));
            error!(status = status.as_u16(), error = %err, "Chat completions API error");
            return Err(err);
        }

        let parsed: ChatCompletionsResponse = serde_json::from_str(&raw).map_err(|e| {
            self.fail(GenerationFailureKind::InvalidResponse, format!("unparsable response: {}", e))
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| self.fail(GenerationFailureKind::InvalidResponse, "response has no content"))?;

        let usage = parsed.usage.unwrap_or_default();
        debug!(total_tokens = usage.total_tokens, "Chat completion received");

        Ok(Completion {
            text: text.trim().to_string(),
            usage,
        })
    }
}

fn role_name(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<Choice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

//
// ================= Scripted model =================
//

/// A canned reply for [`ScriptedModel`].
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Fail(GenerationFailureKind),
    Delayed(Duration, String),
}

/// Deterministic model for tests and offline runs: answers from a queue and
/// records every request it receives.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn texts<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(|t| ScriptedReply::Text(t.into())))
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait::async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();

        let text = match reply {
            Some(ScriptedReply::Text(text)) => text,
            Some(ScriptedReply::Fail(kind)) => {
                return Err(OrchestrationError::generation(kind, "scripted failure"))
            }
            Some(ScriptedReply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                text
            }
            None => {
                return Err(OrchestrationError::generation(
                    GenerationFailureKind::InvalidResponse,
                    "scripted model has no replies left",
                ))
            }
        };

        Ok(Completion {
            usage: TokenUsage {
                completion_tokens: (text.len() as u32 + 3) / 4,
                total_tokens: (text.len() as u32 + 3) / 4,
                ..TokenUsage::default()
            },
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn config(base: String, key: Option<&str>) -> LlmConfig {
        LlmConfig {
            api_key: key.map(str::to_string),
            api_base: base,
            ..LlmConfig::default()
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("saldo?")],
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_tokens: 400,
        }
    }

    #[test]
    fn test_request_serialization() {
        let req = request();
        let body = ChatCompletionsRequest {
            model: &req.model,
            messages: req
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: role_name(m.role),
                    content: &m.content,
                })
                .collect(),
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "saldo?");
        assert_eq!(json["max_tokens"], 400);
    }

    #[test]
    fn test_redact_scrubs_keys() {
        let msg = "bad key sk-abcdef123456 and my-secret-key";
        let out = redact(msg, Some("my-secret-key"));
        assert!(!out.contains("abcdef123456"));
        assert!(!out.contains("my-secret-key"));
    }

    #[tokio::test]
    async fn test_openai_client_sends_expected_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test-key-000")
                    .json_body_includes(json!({"model": "gpt-4o-mini", "max_tokens": 400}).to_string());
                then.status(200).json_body(json!({
                    "choices": [{"message": {"content": " Liquidez estable. "}}],
                    "usage": {"prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8}
                }));
            })
            .await;

        let client = OpenAiChatClient::new(&config(format!("{}/v1", server.base_url()), Some("sk-test-key-000"))).unwrap();
        let completion = client.complete(request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(completion.text, "Liquidez estable.");
        assert_eq!(completion.usage.total_tokens, 8);
    }

    #[tokio::test]
    async fn test_openai_status_mapping_and_redaction() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(401).json_body(json!({
                    "error": {"message": "Incorrect API key provided: sk-test-key-000"}
                }));
            })
            .await;

        let client = OpenAiChatClient::new(&config(format!("{}/v1", server.base_url()), Some("sk-test-key-000"))).unwrap();
        let err = client.complete(request()).await.unwrap_err();

        match &err {
            OrchestrationError::GenerationFailed { kind, .. } => {
                assert_eq!(*kind, GenerationFailureKind::Authentication)
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!err.to_string().contains("sk-test-key-000"));
    }

    #[tokio::test]
    async fn test_rate_limit_is_retryable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(429).body("slow down");
            })
            .await;

        let client = OpenAiChatClient::new(&config(format!("{}/v1", server.base_url()), Some("sk-test-key-000"))).unwrap();
        let err = client.complete(request()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let client = OpenAiChatClient::new(&config("http://127.0.0.1:9".to_string(), None)).unwrap();
        let err = client.complete(request()).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::GenerationFailed {
                kind: GenerationFailureKind::Authentication,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_timeout_wrapper() {
        let model = ScriptedModel::new([ScriptedReply::Delayed(Duration::from_secs(5), "late".into())]);
        let err = complete_with_timeout(&model, request(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_scripted_model_records_requests() {
        let model = ScriptedModel::texts(["one", "two"]);
        assert_eq!(model.complete(request()).await.unwrap().text, "one");
        assert_eq!(model.complete(request()).await.unwrap().text, "two");
        assert!(model.complete(request()).await.is_err());
        assert_eq!(model.requests().len(), 3);
    }
}

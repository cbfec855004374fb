//! Chat backends: where a submitted message goes to get a reply.
//!
//! [`HttpChatBackend`] speaks the small `/chat` protocol of the inference
//! proxy; [`LlmChatBackend`] calls an `edgequake-llm` provider in-process.
//! Both report failures as [`TransportError`]; the coordinator never shows
//! those to the user.

use crate::config::IntakeConfig;
use crate::error::{IntakeError, TransportError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Model used when a provider is named without one.
pub const DEFAULT_LLM_MODEL: &str = "gpt-4.1-nano";

/// A successful reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub response: String,
    /// Time the backend spent generating, when it reports one.
    pub inference_time: Option<Duration>,
    pub model: Option<String>,
}

/// Sends one user message and returns the assistant's reply.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send(&self, message: &str) -> Result<ChatReply, TransportError>;
}

// ── HTTP /chat ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequestBody<'a> {
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponseBody {
    response: String,
    /// Seconds.
    #[serde(default)]
    inference_time: Option<f64>,
}

/// `POST {endpoint}/chat` with `{"message": ...}`.
#[derive(Debug, Clone)]
pub struct HttpChatBackend {
    client: reqwest::Client,
    url: String,
}

impl HttpChatBackend {
    pub fn new(config: &IntakeConfig) -> Result<Self, IntakeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("edgequake-intake/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| IntakeError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}/chat", config.chat_endpoint),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn send(&self, message: &str) -> Result<ChatReply, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .json(&ChatRequestBody { message })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Request(format!("timed out: {e}"))
                } else {
                    TransportError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Request(format!("reading body: {e}")))?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponseBody =
            serde_json::from_str(&body).map_err(|e| TransportError::Malformed(e.to_string()))?;
        debug!("POST {} -> {} chars", self.url, parsed.response.len());

        Ok(ChatReply {
            response: parsed.response,
            inference_time: parsed
                .inference_time
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
            model: None,
        })
    }
}

// ── In-process LLM ───────────────────────────────────────────────────────

/// Calls an `edgequake-llm` provider directly, as the inference proxy would.
#[derive(Clone)]
pub struct LlmChatBackend {
    provider: Arc<dyn LLMProvider>,
    model: String,
    system_prompt: Option<String>,
    temperature: f32,
}

impl std::fmt::Debug for LlmChatBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmChatBackend")
            .field("provider", &"<dyn LLMProvider>")
            .field("model", &self.model)
            .field("system_prompt", &self.system_prompt)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl LlmChatBackend {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
        config: &IntakeConfig,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            system_prompt: config.system_prompt.clone().filter(|p| !p.trim().is_empty()),
            temperature: config.temperature,
        }
    }

    /// Resolve a provider, most specific first:
    ///
    /// 1. `provider_name` (+ `model`, default [`DEFAULT_LLM_MODEL`])
    /// 2. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set
    /// 3. auto-detection from API key variables
    pub fn resolve(
        provider_name: Option<&str>,
        model: Option<&str>,
        config: &IntakeConfig,
    ) -> Result<Self, IntakeError> {
        if let Some(name) = provider_name {
            let model = model.unwrap_or(DEFAULT_LLM_MODEL);
            return Ok(Self::new(create_provider(name, model)?, model, config));
        }

        if let (Ok(name), Ok(model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !name.is_empty() && !model.is_empty() {
                return Ok(Self::new(create_provider(&name, &model)?, model, config));
            }
        }

        let (provider, _embedding) =
            ProviderFactory::from_env().map_err(|e| IntakeError::ProviderNotConfigured {
                provider: "auto".to_string(),
                hint: format!(
                    "No LLM provider could be auto-detected from environment.\n\
                    Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or use the HTTP backend.\n\
                    Error: {}",
                    e
                ),
            })?;
        Ok(Self::new(provider, model.unwrap_or("auto"), config))
    }

}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, IntakeError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        IntakeError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Optional system prompt, then the user turn.
fn build_messages(system_prompt: Option<&str>, message: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if let Some(prompt) = system_prompt {
        messages.push(ChatMessage::system(prompt));
    }
    messages.push(ChatMessage::user(message));
    messages
}

fn build_options(temperature: f32) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        ..Default::default()
    }
}

#[async_trait]
impl ChatBackend for LlmChatBackend {
    async fn send(&self, message: &str) -> Result<ChatReply, TransportError> {
        let messages = build_messages(self.system_prompt.as_deref(), message);
        let options = build_options(self.temperature);

        let start = Instant::now();
        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| TransportError::Request(format!("{}", e)))?;
        let elapsed = start.elapsed();
        debug!(
            "LLM {}: {} input tokens, {} output tokens, {:?}",
            self.model, response.prompt_tokens, response.completion_tokens, elapsed
        );

        Ok(ChatReply {
            response: response.content,
            inference_time: Some(elapsed),
            model: Some(self.model.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgequake_llm::{ChatRole, MockProvider};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn backend_for(server: &MockServer) -> HttpChatBackend {
        let config = IntakeConfig::builder()
            .chat_endpoint(server.uri())
            .request_timeout_secs(5)
            .build()
            .unwrap();
        HttpChatBackend::new(&config).unwrap()
    }

    #[tokio::test]
    async fn posts_message_and_parses_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .and(body_json(serde_json::json!({"message": "Hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"response":"Hi there!","inference_time":0.25}"#,
                "application/json",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let reply = backend_for(&server).await.send("Hello").await.unwrap();
        assert_eq!(reply.response, "Hi there!");
        assert_eq!(reply.inference_time, Some(Duration::from_millis(250)));
        assert_eq!(reply.model, None);
    }

    #[tokio::test]
    async fn inference_time_is_optional() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(r#"{"response":"ok"}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let reply = backend_for(&server).await.send("ping").await.unwrap();
        assert_eq!(reply.response, "ok");
        assert!(reply.inference_time.is_none());
    }

    #[tokio::test]
    async fn non_2xx_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(502).set_body_string("vLLM request failed"))
            .mount(&server)
            .await;

        let err = backend_for(&server).await.send("Hello").await.unwrap_err();
        match err {
            TransportError::Status { status, body } => {
                assert_eq!(status, 502);
                assert!(body.contains("vLLM"));
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = backend_for(&server).await.send("Hello").await.unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)));
    }

    #[tokio::test]
    async fn missing_response_field_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(r#"{"reply":"wrong"}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let err = backend_for(&server).await.send("Hello").await.unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_request_error() {
        let config = IntakeConfig::builder()
            .chat_endpoint("http://127.0.0.1:9")
            .request_timeout_secs(2)
            .build()
            .unwrap();
        let backend = HttpChatBackend::new(&config).unwrap();
        let err = backend.send("Hello").await.unwrap_err();
        assert!(matches!(err, TransportError::Request(_)));
    }

    #[test]
    fn url_joins_endpoint_and_path() {
        let config = IntakeConfig::builder()
            .chat_endpoint("http://localhost:8000/")
            .build()
            .unwrap();
        assert_eq!(HttpChatBackend::new(&config).unwrap().url(), "http://localhost:8000/chat");
    }

    #[test]
    fn build_options_uses_temperature() {
        let opts = build_options(IntakeConfig::default().temperature);
        assert_eq!(opts.temperature, Some(0.7));
        assert_eq!(opts.max_tokens, None);
    }

    #[test]
    fn build_messages_puts_system_prompt_first() {
        let messages = build_messages(Some("Be brief."), "Hello");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages[0].content, "Be brief.");
        assert_eq!(messages[1].role, ChatRole::User);
        assert_eq!(messages[1].content, "Hello");
        assert!(!messages[1].has_images());

        let bare = build_messages(None, "Hello");
        assert_eq!(bare.len(), 1);
        assert_eq!(bare[0].role, ChatRole::User);
    }

    #[test]
    fn blank_system_prompt_is_dropped() {
        let config = IntakeConfig::builder()
            .system_prompt("   ")
            .temperature(0.2)
            .build()
            .unwrap();
        let backend = LlmChatBackend::new(Arc::new(MockProvider::new()), "mock-model", &config);
        assert_eq!(backend.system_prompt, None);
        assert_eq!(backend.temperature, 0.2);
    }

    #[tokio::test]
    async fn llm_backend_returns_provider_content() {
        let provider = MockProvider::new();
        provider.add_response("Hi there!").await;
        let backend =
            LlmChatBackend::new(Arc::new(provider), "mock-model", &IntakeConfig::default());

        let reply = backend.send("Hello").await.unwrap();
        assert_eq!(reply.response, "Hi there!");
        assert_eq!(reply.model.as_deref(), Some("mock-model"));
        assert!(reply.inference_time.is_some());
    }
}

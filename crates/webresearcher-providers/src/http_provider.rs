//! Model client for OpenAI-compatible chat endpoints.
//!
//! Talks directly to any `/chat/completions` endpoint (OpenAI, DashScope,
//! vLLM, OpenRouter, DeepSeek, ...). Failures are reported as
//! [`ProviderError`] so the retry layer can decide what to do with them.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use webresearcher_core::config::LlmConfig;
use webresearcher_core::types::{
    ChatCompletionRequest, ChatCompletionResponse, LlmResponse, Message, ToolDefinition,
};

use crate::error::ProviderError;
use crate::retry::{RetryPolicy, RetryingProvider};
use crate::traits::{LlmProvider, LlmRequestConfig};

// ─────────────────────────────────────────────
// HttpProvider
// ─────────────────────────────────────────────

/// One configured endpoint. Every controller and every parallel run shares
/// a single instance behind an `Arc`.
pub struct HttpProvider {
    client: reqwest::Client,
    /// e.g. `https://dashscope.aliyuncs.com/compatible-mode/v1`
    api_base: String,
    /// Sent as a bearer token; may be empty for local vLLM servers.
    api_key: String,
    default_model: String,
    /// Extra headers to send with each request.
    extra_headers: HeaderMap,
    timeout_secs: u64,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl HttpProvider {
    /// Create a new HttpProvider from the `llm` config section.
    pub fn new(config: &LlmConfig) -> Result<Self, ProviderError> {
        let mut extra_headers = HeaderMap::new();
        if let Some(ref headers) = config.extra_headers {
            for (key, value) in headers {
                if let (Ok(name), Ok(val)) = (
                    HeaderName::from_bytes(key.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    extra_headers.insert(name, val);
                } else {
                    warn!("Invalid header: {}={}", key, value);
                }
            }
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| ProviderError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(HttpProvider {
            client,
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            default_model: config.model.clone(),
            extra_headers,
            timeout_secs: config.timeout_secs,
        })
    }

    fn completions_url(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        format!("{}/chat/completions", base)
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> Result<LlmResponse, ProviderError> {
        debug!(
            model = %model,
            messages = messages.len(),
            tools = tools.map_or(0, |t| t.len()),
            temperature = config.temperature,
            "Calling LLM"
        );

        let request_body = ChatCompletionRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            tools: tools.map(|t| t.to_vec()),
            tool_choice: tools.map(|_| "auto".to_string()),
            max_tokens: Some(config.max_tokens),
            temperature: Some(config.temperature),
            top_p: config.top_p,
            presence_penalty: config.presence_penalty,
            stop: config.stop.clone(),
        };

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .headers(self.extra_headers.clone())
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP request failed");
                if e.is_timeout() {
                    ProviderError::Timeout(self.timeout_secs)
                } else {
                    ProviderError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(status = %status, body = %body, "API error");
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chat_resp = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to parse LLM response");
                ProviderError::Decode(e.to_string())
            })?;

        let llm_resp = chat_resp
            .into_llm_response()
            .ok_or(ProviderError::EmptyResponse)?;

        debug!(
            has_content = llm_resp.content.is_some(),
            tool_calls = llm_resp.tool_calls.len(),
            finish_reason = llm_resp.finish_reason.as_deref().unwrap_or("?"),
            "LLM response received"
        );
        Ok(llm_resp)
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn display_name(&self) -> &str {
        "OpenAI-compatible"
    }
}

// ─────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────

/// Build the model client used by the research controllers: an
/// `HttpProvider` wrapped in a `RetryingProvider` with `llm.maxRetries` attempts.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> {
    let http = HttpProvider::new(config)?;
    debug!(
        model = %config.model,
        api_base = %config.api_base,
        max_retries = config.max_retries,
        "Creating LLM provider"
    );
    let policy = RetryPolicy::default().with_max_attempts(config.max_retries);
    Ok(Arc::new(RetryingProvider::new(Arc::new(http), policy)))
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_config(api_key: &str, api_base: &str) -> LlmConfig {
        LlmConfig {
            api_key: api_key.to_string(),
            api_base: api_base.to_string(),
            ..Default::default()
        }
    }

    fn ok_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-test",
            "choices": [{
                "message": { "content": content },
                "finish_reason": "stop"
            }],
            "usage": null
        })
    }

    // ── construction ──

    #[test]
    fn test_completions_url_trailing_slash() {
        let provider = HttpProvider::new(&make_config("key", "https://api.openai.com/v1/")).unwrap();
        assert_eq!(
            provider.completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_completions_url_no_trailing_slash() {
        let provider = HttpProvider::new(&make_config("key", "http://localhost:8000/v1")).unwrap();
        assert_eq!(
            provider.completions_url(),
            "http://localhost:8000/v1/chat/completions"
        );
    }

    #[test]
    fn test_extra_headers() {
        let mut headers = HashMap::new();
        headers.insert("X-DashScope-Workspace".to_string(), "ws-1".to_string());
        headers.insert("bad header".to_string(), "x".to_string());
        let config = LlmConfig {
            extra_headers: Some(headers),
            ..make_config("key", "https://example.com/v1")
        };
        let provider = HttpProvider::new(&config).unwrap();
        assert!(provider.extra_headers.contains_key("x-dashscope-workspace"));
        assert_eq!(provider.extra_headers.len(), 1);
    }

    #[test]
    fn test_default_model() {
        let config = LlmConfig {
            model: "qwen-max".to_string(),
            ..Default::default()
        };
        let provider = HttpProvider::new(&config).unwrap();
        assert_eq!(provider.default_model(), "qwen-max");
    }

    #[test]
    fn test_create_provider_wraps_retry() {
        let config = LlmConfig {
            model: "qwen-plus".to_string(),
            ..Default::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.default_model(), "qwen-plus");
        assert_eq!(provider.display_name(), "OpenAI-compatible");
    }

    // ── against a mock endpoint ──

    #[tokio::test]
    async fn test_chat_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-test",
                "choices": [{
                    "message": {
                        "content": "<plan>search</plan>",
                        "tool_calls": null
                    },
                    "finish_reason": "stop"
                }],
                "usage": {
                    "prompt_tokens": 10,
                    "completion_tokens": 5,
                    "total_tokens": 15
                }
            })))
            .mount(&mock_server)
            .await;

        let provider = HttpProvider::new(&make_config("test-key-123", &mock_server.uri())).unwrap();
        let messages = vec![Message::system("You are a researcher."), Message::user("Hello")];

        let resp = provider
            .chat(&messages, None, "gpt-4o", &LlmRequestConfig::default())
            .await
            .unwrap();

        assert_eq!(resp.content.as_deref(), Some("<plan>search</plan>"));
        assert!(!resp.has_tool_calls());
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.as_ref().unwrap().total_tokens, 15);
    }

    #[tokio::test]
    async fn test_chat_with_tool_calls() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({ "tool_choice": "auto" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-tools",
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_abc123",
                            "type": "function",
                            "function": {
                                "name": "search",
                                "arguments": "{\"query\": [\"rust async\"]}"
                            }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            })))
            .mount(&mock_server)
            .await;

        let provider = HttpProvider::new(&make_config("key", &mock_server.uri())).unwrap();
        let tool_def = ToolDefinition::new(
            "search",
            "Search the web",
            serde_json::json!({"type": "object", "properties": {"query": {"type": "array"}}}),
        );

        let resp = provider
            .chat(
                &[Message::user("Search for Rust")],
                Some(&[tool_def]),
                "gpt-4o",
                &LlmRequestConfig::default(),
            )
            .await
            .unwrap();

        assert!(resp.content.is_none());
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].function.name, "search");
        assert_eq!(resp.tool_calls[0].id, "call_abc123");
    }

    #[tokio::test]
    async fn test_chat_api_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Rate limit exceeded"))
            .mount(&mock_server)
            .await;

        let provider = HttpProvider::new(&make_config("key", &mock_server.uri())).unwrap();
        let err = provider
            .chat(&[Message::user("Hello")], None, "gpt-4o", &LlmRequestConfig::default())
            .await
            .unwrap_err();

        match err {
            ProviderError::Status { status, ref body } => {
                assert_eq!(status, 429);
                assert!(body.contains("Rate limit"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_chat_network_error() {
        // nothing listens on this port
        let provider = HttpProvider::new(&make_config("key", "http://127.0.0.1:1")).unwrap();
        let err = provider
            .chat(&[Message::user("Hello")], None, "gpt-4o", &LlmRequestConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Http(_)));
    }

    #[tokio::test]
    async fn test_chat_no_choices() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })),
            )
            .mount(&mock_server)
            .await;

        let provider = HttpProvider::new(&make_config("key", &mock_server.uri())).unwrap();
        let err = provider
            .chat(&[Message::user("Hello")], None, "gpt-4o", &LlmRequestConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_chat_garbage_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&mock_server)
            .await;

        let provider = HttpProvider::new(&make_config("key", &mock_server.uri())).unwrap();
        let err = provider
            .chat(&[Message::user("Hello")], None, "gpt-4o", &LlmRequestConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_chat_sends_sampling_and_stop() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "qwen-max",
                "max_tokens": 8192,
                "top_p": 0.95,
                "presence_penalty": 1.1,
                "stop": ["<tool_response>"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("ok")))
            .mount(&mock_server)
            .await;

        let provider = HttpProvider::new(&make_config("key", &mock_server.uri())).unwrap();
        let req_config =
            LlmRequestConfig::from_config(&LlmConfig::default()).with_stop(&["<tool_response>"]);

        // an unmatched body falls through to wiremock's 404
        let resp = provider
            .chat(&[Message::user("test")], None, "qwen-max", &req_config)
            .await
            .unwrap();
        assert_eq!(resp.content.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_chat_with_reasoning_content() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-reasoning",
                "choices": [{
                    "message": {
                        "content": "<answer>42</answer>",
                        "reasoning_content": "Let me think step by step..."
                    },
                    "finish_reason": "stop"
                }],
                "usage": null
            })))
            .mount(&mock_server)
            .await;

        let provider = HttpProvider::new(&make_config("key", &mock_server.uri())).unwrap();
        let resp = provider
            .chat(
                &[Message::user("What is the meaning of life?")],
                None,
                "deepseek-reasoner",
                &LlmRequestConfig::default(),
            )
            .await
            .unwrap();

        assert_eq!(resp.content.as_deref(), Some("<answer>42</answer>"));
        assert_eq!(
            resp.reasoning_content.as_deref(),
            Some("Let me think step by step...")
        );
    }
}

//! LLM Provider trait: the model client abstraction.
//!
//! The research controllers only ever talk to `dyn LlmProvider`. The
//! `HttpProvider` in `http_provider.rs` covers all OpenAI-compatible APIs;
//! `RetryingProvider` in `retry.rs` wraps any provider with backoff.

use async_trait::async_trait;
use webresearcher_core::config::LlmConfig;
use webresearcher_core::types::{LlmResponse, Message, ToolDefinition};

use crate::error::ProviderError;

/// Sampling parameters passed to each LLM call.
#[derive(Clone, Debug)]
pub struct LlmRequestConfig {
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
    pub top_p: Option<f64>,
    pub presence_penalty: Option<f64>,
    /// Stop sequences; empty means none.
    pub stop: Vec<String>,
}

impl Default for LlmRequestConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
            top_p: None,
            presence_penalty: None,
            stop: Vec::new(),
        }
    }
}

impl LlmRequestConfig {
    /// Sampling parameters from the `llm` config section.
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: Some(config.top_p),
            presence_penalty: Some(config.presence_penalty),
            stop: Vec::new(),
        }
    }

    /// Same parameters at a different temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Same parameters with the given stop sequences.
    pub fn with_stop(mut self, stop: &[&str]) -> Self {
        self.stop = stop.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Trait that all LLM providers must implement.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request.
    ///
    /// # Arguments
    /// * `messages`: Conversation in OpenAI format.
    /// * `tools`: Optional list of tool definitions the LLM can call.
    /// * `model`: Model identifier (e.g. `"gpt-4o"`).
    /// * `config`: Temperature, max_tokens, etc.
    ///
    /// # Returns
    /// An `LlmResponse` with content and/or tool calls, or the reason the
    /// call failed.
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> Result<LlmResponse, ProviderError>;

    /// The default model for this provider instance.
    fn default_model(&self) -> &str;

    /// Display name for logging.
    fn display_name(&self) -> &str;
}

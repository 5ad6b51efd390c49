//! LLM provider layer for WebResearcher.
//!
//! # Architecture
//!
//! - [`traits::LlmProvider`]: trait that all providers implement
//! - [`http_provider::HttpProvider`]: generic OpenAI-compatible HTTP client
//! - [`retry::RetryingProvider`]: exponential backoff around any provider
//! - [`http_provider::create_provider`]: convenience builder from the `llm` config

pub mod error;
pub mod http_provider;
pub mod retry;
pub mod traits;

// Re-export main types for convenience
pub use error::ProviderError;
pub use http_provider::{create_provider, HttpProvider};
pub use retry::{RetryPolicy, RetryingProvider};
pub use traits::{LlmProvider, LlmRequestConfig};

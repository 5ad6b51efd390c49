//! Configuration schema.
//!
//! Hierarchy: `Config` → `LlmConfig`, `AgentConfig`, `WeaverConfig`,
//! `TtsConfig`, `ToolsConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! We use `#[serde(rename_all = "camelCase")]` to handle the conversion.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The research tools available to the single-agent loop and the planner.
pub const DEFAULT_TOOLS: &[&str] = &["search", "google_scholar", "visit", "python", "parse_file"];

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration: loaded from `~/.webresearcher/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub weaver: WeaverConfig,
    pub tts: TtsConfig,
    pub tools: ToolsConfig,
}

// ─────────────────────────────────────────────
// LLM endpoint
// ─────────────────────────────────────────────

/// Model identity, endpoint, and sampling parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmConfig {
    /// Model identifier sent in each request.
    pub model: String,
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`).
    pub api_base: String,
    /// Bearer API key.
    pub api_key: String,
    /// Maximum tokens to generate per response.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
    pub top_p: f64,
    pub presence_penalty: f64,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Attempts per model call before reporting a client failure.
    pub max_retries: u32,
    /// Extra HTTP headers to send with each request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<HashMap<String, String>>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            max_tokens: 8192,
            temperature: 0.6,
            top_p: 0.95,
            presence_penalty: 1.1,
            timeout_secs: 300,
            max_retries: 3,
            extra_headers: None,
        }
    }
}

impl LlmConfig {
    /// Whether an API key has been configured.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// ─────────────────────────────────────────────
// Single-agent loop
// ─────────────────────────────────────────────

/// How the model expresses actions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// `<tool_call>{...}</tool_call>` embedded in the response text.
    #[default]
    Tagged,
    /// Native `tool_calls` field of the chat completion response.
    Function,
}

impl std::str::FromStr for ProtocolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tagged" | "xml" => Ok(ProtocolKind::Tagged),
            "function" | "fc" | "function_calling" => Ok(ProtocolKind::Function),
            other => Err(format!("unknown protocol '{other}' (expected 'tagged' or 'function')")),
        }
    }
}

/// Round controller settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Model calls per run before the forced final answer.
    pub max_rounds: u32,
    /// Wall-clock budget for one run, in seconds.
    pub agent_timeout_secs: u64,
    /// Token budget for the messages of one model call.
    pub max_input_tokens: usize,
    /// Hard character cap applied to the carried-over report.
    pub max_report_chars: usize,
    /// Per-tool-call timeout, in seconds.
    pub tool_timeout_secs: u64,
    /// Consecutive parse/tool failures tolerated before forcing an answer.
    pub max_consecutive_failures: u32,
    pub protocol: ProtocolKind,
    /// Tool allow-list (names).
    pub tools: Vec<String>,
    /// Free text appended to the system prompt.
    pub instruction: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: 100,
            agent_timeout_secs: 1800,
            max_input_tokens: 32_000,
            max_report_chars: 20_000,
            tool_timeout_secs: 120,
            max_consecutive_failures: 3,
            protocol: ProtocolKind::Tagged,
            tools: DEFAULT_TOOLS.iter().map(|s| s.to_string()).collect(),
            instruction: String::new(),
        }
    }
}

// ─────────────────────────────────────────────
// Planner / writer
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WeaverConfig {
    /// Model calls per phase.
    pub max_rounds: u32,
    pub temperature: f64,
    /// Planner rounds without outline change or new evidence before the phase ends.
    pub max_idle_rounds: u32,
    /// Writer rounds without a written section before the "write now" hint.
    pub idle_write_hint: u32,
    /// Wall-clock budget per phase, in seconds.
    pub phase_timeout_secs: u64,
}

impl Default for WeaverConfig {
    fn default() -> Self {
        Self {
            max_rounds: 50,
            temperature: 0.1,
            max_idle_rounds: 4,
            idle_write_hint: 6,
            phase_timeout_secs: 1800,
        }
    }
}

// ─────────────────────────────────────────────
// Test-time scaling
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TtsConfig {
    /// Parallel agent runs.
    pub num_agents: usize,
    /// Temperature added per agent index.
    pub temperature_step: f64,
    pub synthesis_temperature: f64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            num_agents: 3,
            temperature_step: 0.2,
            synthesis_temperature: 0.2,
        }
    }
}

// ─────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────

/// Credentials and endpoints for the research tools.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    /// Serper API key (Google web + scholar search).
    pub serper_api_key: String,
    pub serper_base_url: String,
    /// Jina reader API key; direct fetching is used when empty.
    pub jina_api_key: String,
    pub jina_base_url: String,
    /// Python sandbox endpoints; local `python3` is used when empty.
    pub sandbox_endpoints: Vec<String>,
    /// Root directory for `parse_file`.
    pub file_dir: String,
    /// Maximum characters of page content returned by `visit`.
    pub visit_max_chars: usize,
    /// Results requested per search query.
    pub search_results: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            serper_api_key: String::new(),
            serper_base_url: "https://google.serper.dev".to_string(),
            jina_api_key: String::new(),
            jina_base_url: "https://r.jina.ai".to_string(),
            sandbox_endpoints: Vec::new(),
            file_dir: "./files".to_string(),
            visit_max_chars: 150_000,
            search_results: 10,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

//! Test doubles shared by the controller tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use webresearcher_core::types::{LlmResponse, Message, ToolDefinition};
use webresearcher_providers::{LlmProvider, LlmRequestConfig, ProviderError};

use crate::tools::Tool;

pub enum Step {
    Reply(LlmResponse),
    Fail(ProviderError),
    /// Reply after sleeping (use with a paused clock).
    Slow(Duration, LlmResponse),
}

pub fn reply(text: &str) -> Step {
    Step::Reply(LlmResponse::text(text))
}

/// What the controller sent on one call.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub offered_tools: usize,
    pub temperature: f64,
    pub stop: Vec<String>,
}

impl RecordedCall {
    pub fn user_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role() == "user")
            .map(|m| m.text().to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Provider that plays back a fixed script and records every request.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        _model: &str,
        config: &LlmRequestConfig,
    ) -> Result<LlmResponse, ProviderError> {
        self.calls.lock().unwrap().push(RecordedCall {
            messages: messages.to_vec(),
            offered_tools: tools.map(|t| t.len()).unwrap_or(0),
            temperature: config.temperature,
            stop: config.stop.clone(),
        });
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(r)) => Ok(r),
            Some(Step::Fail(e)) => Err(e),
            Some(Step::Slow(delay, r)) => {
                tokio::time::sleep(delay).await;
                Ok(r)
            }
            None => Err(ProviderError::EmptyResponse),
        }
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    fn display_name(&self) -> &str {
        "Scripted"
    }
}

/// `search` stand-in returning one fixed hit for any query.
pub struct FixedSearchTool {
    pub snippet: String,
}

#[async_trait]
impl Tool for FixedSearchTool {
    fn name(&self) -> &str {
        "search"
    }
    fn description(&self) -> &str {
        "Fixed search"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {"query": {"type": "array", "items": {"type": "string"}}}})
    }
    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let q = params.get("query").cloned().unwrap_or(Value::Null);
        Ok(format!(
            "A Google search for '{q}' found 1 results:\n\n## Web Results\n1. [Census data](https://census.example/x)\n\n{}",
            self.snippet
        ))
    }
}

/// `search` stand-in that answers only after `delay`.
pub struct SlowTool {
    pub delay: Duration,
    pub output: String,
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "search"
    }
    fn description(&self) -> &str {
        "Slow search"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {"query": {"type": "array", "items": {"type": "string"}}}})
    }
    async fn execute(&self, _params: HashMap<String, Value>) -> anyhow::Result<String> {
        tokio::time::sleep(self.delay).await;
        Ok(self.output.clone())
    }
}

/// Tool that always fails.
pub struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "visit"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _params: HashMap<String, Value>) -> anyhow::Result<String> {
        anyhow::bail!("connection refused")
    }
}

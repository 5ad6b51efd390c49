//! Tool dispatcher: name → capability lookup, timeout, error capture.
//!
//! Whatever a tool does, the caller gets an [`Observation`] back. Unknown
//! names, tool errors and timeouts become `is_error` observations; nothing
//! here propagates an error out of a round.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use webresearcher_core::types::ToolDefinition;

use super::base::Tool;
use crate::error::ResearchError;
use crate::research::{Observation, ToolCall};

// ─────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────

/// Stores tools keyed by name and dispatches normalized calls.
pub struct ToolDispatcher {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            timeout,
        }
    }

    /// Build from an explicit tool list, keeping only names in `allow`.
    /// An empty allow-list keeps everything.
    pub fn from_tools(
        tools: impl IntoIterator<Item = Arc<dyn Tool>>,
        allow: &[String],
        timeout: Duration,
    ) -> Self {
        let mut dispatcher = Self::new(timeout);
        for tool in tools {
            if allow.is_empty() || allow.iter().any(|a| a == tool.name()) {
                dispatcher.register(tool);
            } else {
                debug!(tool = tool.name(), "tool not in allow-list, skipped");
            }
        }
        dispatcher
    }

    /// Register a tool. Overwrites any previous tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        info!(tool = tool.name(), "registered tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Names of all registered tools, sorted for determinism.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Function-calling definitions, sorted by name.
    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute one call. Cancellation abandons the tool future (dropping it)
    /// and yields an error observation.
    pub async fn execute(&self, call: &ToolCall, round: u32, cancel: &CancellationToken) -> Observation {
        let name = call.tool_name.as_str();
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, round, "tool not found");
            let content = format!(
                "Error: Tool '{name}' not found. Valid tools: {}",
                self.tool_names().join(", ")
            );
            return Observation::error(name, content, round);
        };

        info!(tool = name, round, "executing tool call");
        let run = tokio::time::timeout(self.timeout, tool.execute(call.arguments.clone()));
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(tool = name, round, "tool call abandoned on cancellation");
                return Observation::error(name, format!("Error: {}", ResearchError::Cancelled), round);
            }
            outcome = run => outcome,
        };

        match outcome {
            Ok(Ok(content)) => Observation::ok(name, content, round),
            Ok(Err(e)) => {
                warn!(tool = name, round, error = %e, "tool execution failed");
                let err = ResearchError::Tool {
                    tool: name.to_string(),
                    message: e.to_string(),
                };
                Observation::error(name, format!("Error: {err}"), round)
            }
            Err(_) => {
                let err = ResearchError::ToolTimeout {
                    tool: name.to_string(),
                    secs: self.timeout.as_secs(),
                };
                warn!(tool = name, round, "{err}");
                Observation::error(name, format!("Error: {err}"), round)
            }
        }
    }

    /// Execute calls concurrently; results come back in request order.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
        round: u32,
        cancel: &CancellationToken,
    ) -> Vec<Observation> {
        join_all(calls.iter().map(|c| self.execute(c, round, cancel))).await
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

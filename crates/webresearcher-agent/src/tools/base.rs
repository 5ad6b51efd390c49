//! Tool trait: the capability interface every research tool implements.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use webresearcher_core::types::ToolDefinition;

// ─────────────────────────────────────────────
// Tool trait
// ─────────────────────────────────────────────

/// Every research tool implements this trait.
///
/// Controllers advertise tools via `to_definition()` (function-calling) or
/// the system prompt (tagged text), and dispatch calls through the
/// [`ToolDispatcher`](super::dispatcher::ToolDispatcher).
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used by the model to call this tool (e.g. `"search"`).
    fn name(&self) -> &str;

    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema describing the parameters (as a `serde_json::Value`).
    ///
    /// Must be `{"type": "object", "properties": {...}, "required": [...]}`.
    fn parameters(&self) -> Value;

    /// Execute the tool with the given arguments.
    ///
    /// Returns the tool output as a string (the model reads this).
    /// On failure, return an `Err`; the dispatcher turns it into an
    /// error observation.
    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String>;

    /// Build the `ToolDefinition` sent to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────

/// Extract an optional `String` param.
pub fn optional_string(params: &HashMap<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Extract a list-of-strings param.
///
/// Models frequently pass a bare string where the schema asks for an array,
/// or a JSON-encoded array as a string; all three shapes are accepted.
/// Empty entries are dropped.
pub fn require_string_list(params: &HashMap<String, Value>, key: &str) -> anyhow::Result<Vec<String>> {
    let value = params
        .get(key)
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {key}"))?;

    let items: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Value::String(s) => match serde_json::from_str::<Vec<String>>(s) {
            Ok(list) if s.trim_start().starts_with('[') => list,
            _ => vec![s.clone()],
        },
        other => anyhow::bail!("Parameter {key} must be a string or a list of strings, got {other}"),
    };

    let items: Vec<String> = items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if items.is_empty() {
        anyhow::bail!("Parameter {key} must not be empty");
    }
    Ok(items)
}

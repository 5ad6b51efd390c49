//! Model output parsing for both action protocols.
//!
//! The tagged-text protocol embeds `<plan>`, `<report>` and one of
//! `<tool_call>` / `<answer>` / `<terminate>` in the response text. The
//! function-calling protocol carries tool calls in a structured field and
//! keeps plan/report/answer as tags. Both normalize to [`ParsedResponse`];
//! controllers never look at the wire format.

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

use webresearcher_core::config::ProtocolKind;
use webresearcher_core::types::{self as wire, LlmResponse};

use crate::research::{Observation, ToolCall};

/// Marker pair wrapping re-injected tool output.
pub const OBS_START: &str = "<tool_response>";
pub const OBS_END: &str = "</tool_response>";

/// Corrective observation for a response without a usable action.
pub const PARSE_ERROR_HINT: &str = "Could not parse an action from your response. Specify exactly one \
<tool_call>{\"name\": ..., \"arguments\": {...}}</tool_call> or a final <answer>...</answer>, \
after your <plan> and <report>.";

// ─────────────────────────────────────────────
// Parsed shapes
// ─────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum ParsedAction {
    Answer(String),
    /// Body of `<terminate>` (may be empty).
    Terminate(String),
    /// Calls that parsed, plus one message per call that did not.
    ToolCalls { calls: Vec<ToolCall>, errors: Vec<String> },
    /// No action at all.
    Missing,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedResponse {
    pub plan: String,
    pub report: String,
    pub action: ParsedAction,
}

// ─────────────────────────────────────────────
// Tag extraction
// ─────────────────────────────────────────────

/// The last non-empty `<tag>…</tag>` block that starts a line, trimmed.
pub fn extract_tag(text: &str, tag: &str) -> Option<String> {
    let tag = regex::escape(tag);
    let re = Regex::new(&format!(r"(?sm)^\s*<{tag}>(.*?)</{tag}>")).ok()?;
    re.captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|body| !body.is_empty())
        .last()
        .map(str::to_string)
}

/// Whether a `<tag>` block is present at all, even with an empty body.
pub fn has_tag(text: &str, tag: &str) -> bool {
    let tag = regex::escape(tag);
    Regex::new(&format!(r"(?sm)^\s*<{tag}>(.*?)</{tag}>"))
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

fn strip_code_fences(body: &str) -> &str {
    let trimmed = body.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json) up to the first newline.
    let rest = rest.split_once('\n').map(|(_, r)| r).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn arguments_from_value(value: Option<Value>) -> Result<HashMap<String, Value>, String> {
    match value {
        None | Some(Value::Null) => Ok(HashMap::new()),
        Some(Value::Object(map)) => Ok(map.into_iter().collect()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(HashMap::new()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => Ok(map.into_iter().collect()),
            Ok(_) => Err("\"arguments\" must be a JSON object".into()),
            Err(e) => Err(format!("\"arguments\" is not valid JSON: {e}")),
        },
        Some(_) => Err("\"arguments\" must be a JSON object".into()),
    }
}

/// Parse the body of a `<tool_call>` block.
pub fn parse_tool_call(body: &str) -> Result<ToolCall, String> {
    if let (Some(start), Some(end)) = (body.find("<code>"), body.rfind("</code>")) {
        if start + "<code>".len() <= end {
            let code = body[start + "<code>".len()..end].trim();
            let mut arguments = HashMap::new();
            arguments.insert("code".to_string(), Value::String(code.to_string()));
            return Ok(ToolCall {
                tool_name: "python".into(),
                arguments,
                raw_text: body.to_string(),
            });
        }
    }

    let cleaned = strip_code_fences(body);
    let json = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => return Err("tool call is not a JSON object".into()),
    };
    let value: Value = serde_json::from_str(json).map_err(|e| format!("tool call is not valid JSON: {e}"))?;
    let Value::Object(mut obj) = value else {
        return Err("tool call is not a JSON object".into());
    };

    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| "tool call is missing \"name\"".to_string())?
        .to_string();
    let arguments = arguments_from_value(obj.remove("arguments"))?;

    Ok(ToolCall {
        tool_name: name,
        arguments,
        raw_text: body.to_string(),
    })
}

/// Normalize a structured function call.
pub fn normalize_function_call(call: &wire::ToolCall) -> Result<ToolCall, String> {
    let name = call.function.name.trim();
    if name.is_empty() {
        return Err("function call is missing a name".into());
    }
    let raw = call.function.arguments.clone();
    let arguments = arguments_from_value(Some(Value::String(raw.clone())))
        .map_err(|e| format!("{name}: {e}"))?;
    Ok(ToolCall {
        tool_name: name.to_string(),
        arguments,
        raw_text: raw,
    })
}

// ─────────────────────────────────────────────
// Response parsing
// ─────────────────────────────────────────────

/// Split one model response into plan, report and action.
///
/// Priority when several actions appear: answer, then terminate, then tool
/// calls. In function mode, structured calls win over a `<tool_call>` tag.
pub fn parse_response(response: &LlmResponse, protocol: ProtocolKind) -> ParsedResponse {
    let text = response.content_str();
    let plan = extract_tag(text, "plan").unwrap_or_default();
    let report = extract_tag(text, "report").unwrap_or_default();

    let action = if let Some(answer) = extract_tag(text, "answer") {
        ParsedAction::Answer(answer)
    } else if has_tag(text, "terminate") {
        ParsedAction::Terminate(extract_tag(text, "terminate").unwrap_or_default())
    } else if protocol == ProtocolKind::Function && response.has_tool_calls() {
        let mut calls = Vec::new();
        let mut errors = Vec::new();
        for call in &response.tool_calls {
            match normalize_function_call(call) {
                Ok(c) => calls.push(c),
                Err(e) => errors.push(e),
            }
        }
        ParsedAction::ToolCalls { calls, errors }
    } else if let Some(body) = extract_tag(text, "tool_call") {
        match parse_tool_call(&body) {
            Ok(call) => ParsedAction::ToolCalls {
                calls: vec![call],
                errors: Vec::new(),
            },
            Err(e) => ParsedAction::ToolCalls {
                calls: Vec::new(),
                errors: vec![e],
            },
        }
    } else {
        ParsedAction::Missing
    };

    ParsedResponse { plan, report, action }
}

/// Wrap observations in response markers, blank-line separated.
pub fn render_observations(observations: &[Observation]) -> String {
    observations
        .iter()
        .map(|o| format!("{OBS_START}\n{}\n{OBS_END}", o.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

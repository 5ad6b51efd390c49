//! Core wire types for WebResearcher: chat messages, tool calls, and LLM responses.
//!
//! These types model the OpenAI chat completions format spoken by every
//! supported model endpoint. The research engine builds `Message` lists,
//! the provider layer serializes them, and responses come back as `LlmResponse`.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────

/// One entry of a prompt. The serde tag is the wire `role`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "system")]
    System { content: String },

    #[serde(rename = "user")]
    User { content: String },

    #[serde(rename = "assistant")]
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
        /// Reasoning/thinking content from models like DeepSeek-R1 or QwQ.
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning_content: Option<String>,
    },

    #[serde(rename = "tool")]
    Tool {
        content: String,
        tool_call_id: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    /// Assistant turn with text only; the ReAct history stores these.
    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: None,
            reasoning_content: None,
        }
    }

    /// Reply to a function-calling `tool_calls` entry, matched by id.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    /// The textual payload of the message (empty for tool-call-only assistant turns).
    pub fn text(&self) -> &str {
        match self {
            Message::System { content } | Message::User { content } => content,
            Message::Assistant { content, .. } => content.as_deref().unwrap_or(""),
            Message::Tool { content, .. } => content,
        }
    }

    /// Role name as sent on the wire.
    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::Tool { .. } => "tool",
        }
    }
}

// ─────────────────────────────────────────────
// Function calls
// ─────────────────────────────────────────────

/// A structured tool call emitted by the model in function-calling mode.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Echoed back by the matching `tool` message.
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        ToolCall {
            id: id.into(),
            call_type: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Name plus raw arguments; the agent crate parses and repairs the JSON.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// Still a JSON string here, possibly malformed.
    #[serde(default)]
    pub arguments: String,
}

// ─────────────────────────────────────────────
// Tool schemas
// ─────────────────────────────────────────────

/// Tool schema, listed in the system prompt (tagged mode) or sent as
/// `tools` (function mode).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

// ─────────────────────────────────────────────
// Model responses
// ─────────────────────────────────────────────

/// Response from an LLM provider after a successful chat completion call.
#[derive(Clone, Debug, Default)]
pub struct LlmResponse {
    /// `<plan>`/`<report>`/action text. `None` for a bare function call.
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    /// `stop` also covers hitting the `<tool_response>` stop sequence.
    pub finish_reason: Option<String>,
    pub usage: Option<UsageInfo>,
    /// Reasoning/thinking content, when the endpoint exposes it.
    pub reasoning_content: Option<String>,
}

impl LlmResponse {
    /// A plain text response (used by scripted providers in tests and fallbacks).
    pub fn text(content: impl Into<String>) -> Self {
        LlmResponse {
            content: Some(content.into()),
            finish_reason: Some("stop".to_string()),
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Text content, or the empty string.
    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Usage as reported by the endpoint; logged, never used for budgeting.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UsageInfo {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

// ─────────────────────────────────────────────
// Wire format
// ─────────────────────────────────────────────

/// `/chat/completions` response body.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    pub usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: AssistantMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

impl ChatCompletionResponse {
    /// Take the first choice as an `LlmResponse`. `None` when the API returned no choices.
    pub fn into_llm_response(self) -> Option<LlmResponse> {
        let usage = self.usage;
        self.choices.into_iter().next().map(|c| LlmResponse {
            content: c.message.content,
            tool_calls: c.message.tool_calls.unwrap_or_default(),
            finish_reason: c.finish_reason,
            usage,
            reasoning_content: c.message.reasoning_content,
        })
    }
}

/// `/chat/completions` request body. `stop` carries the observation marker
/// in tagged mode.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── messages ──

    #[test]
    fn test_system_message_serialization() {
        let msg = Message::system("You are a research assistant.");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "You are a research assistant.");
    }

    #[test]
    fn test_user_message_serialization() {
        let msg = Message::user("**Question:** what is 2+2?");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "**Question:** what is 2+2?");
    }

    #[test]
    fn test_assistant_text_message_omits_empty_fields() {
        let msg = Message::assistant("<answer>4</answer>");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "assistant");
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("reasoning_content").is_none());
    }

    #[test]
    fn test_tool_result_serialization() {
        let msg = Message::tool_result("call_123", "A Google search for 'x' found 1 results");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_123");
    }

    #[test]
    fn test_message_text_and_role() {
        assert_eq!(Message::user("hi").text(), "hi");
        assert_eq!(Message::user("hi").role(), "user");
        let empty = Message::Assistant {
            content: None,
            tool_calls: Some(vec![]),
            reasoning_content: None,
        };
        assert_eq!(empty.text(), "");
    }

    #[test]
    fn test_message_round_trip() {
        let messages = vec![
            Message::system("sys"),
            Message::user("question"),
            Message::assistant("answer"),
            Message::tool_result("call_1", "done"),
        ];

        let json_str = serde_json::to_string(&messages).unwrap();
        let deserialized: Vec<Message> = serde_json::from_str(&json_str).unwrap();

        assert_eq!(messages, deserialized);
    }

    // ── Tool calls ──

    #[test]
    fn test_tool_call_missing_type_defaults_to_function() {
        let call: ToolCall = serde_json::from_value(json!({
            "id": "call_1",
            "function": { "name": "search", "arguments": "{\"query\":[\"rust\"]}" }
        }))
        .unwrap();

        assert_eq!(call.call_type, "function");
        assert_eq!(call.function.name, "search");
    }

    #[test]
    fn test_tool_definition_serialization() {
        let def = ToolDefinition::new(
            "search",
            "Web search",
            json!({"type": "object", "properties": {"query": {"type": "array"}}}),
        );
        let json = serde_json::to_value(&def).unwrap();

        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "search");
        assert_eq!(json["function"]["parameters"]["type"], "object");
    }

    // ── responses ──

    #[test]
    fn test_chat_completion_response_parsing() {
        let api_json = json!({
            "id": "chatcmpl-abc123",
            "choices": [{
                "message": {
                    "content": "<plan>p</plan>",
                    "tool_calls": null,
                    "reasoning_content": "thinking..."
                },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 8, "total_tokens": 18 }
        });

        let resp: ChatCompletionResponse = serde_json::from_value(api_json).unwrap();
        let llm_resp = resp.into_llm_response().unwrap();

        assert_eq!(llm_resp.content_str(), "<plan>p</plan>");
        assert!(!llm_resp.has_tool_calls());
        assert_eq!(llm_resp.reasoning_content.as_deref(), Some("thinking..."));
        assert_eq!(llm_resp.usage.unwrap().total_tokens, 18);
    }

    #[test]
    fn test_chat_completion_no_choices() {
        let resp: ChatCompletionResponse =
            serde_json::from_value(json!({"id": "x", "choices": []})).unwrap();
        assert!(resp.into_llm_response().is_none());
    }

    #[test]
    fn test_request_skips_unset_sampling_fields() {
        let req = ChatCompletionRequest {
            model: "gpt-4o".into(),
            messages: vec![Message::user("hi")],
            tools: None,
            tool_choice: None,
            max_tokens: Some(100),
            temperature: Some(0.6),
            top_p: None,
            presence_penalty: None,
            stop: vec![],
        };
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["max_tokens"], 100);
        assert!(json.get("top_p").is_none());
        assert!(json.get("stop").is_none());
        assert!(json.get("tools").is_none());
    }
}

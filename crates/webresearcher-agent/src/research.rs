//! Data model shared by the research controllers: workspace state, the
//! round trajectory, normalized tool calls, observations, and results.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Initial report shown to the model before anything has been written.
pub const EMPTY_REPORT_PLACEHOLDER: &str = "This is the first round. The report is empty.";

/// Initial observation shown to the model before any tool ran.
pub const EMPTY_OBSERVATION_PLACEHOLDER: &str = "This is the first round. No tool has been called yet.";

/// Returned when no model output could be recovered at all.
pub const APOLOGY_ANSWER: &str =
    "I'm sorry, I was unable to find an answer to this question within the available budget.";

// ─────────────────────────────────────────────
// Workspace
// ─────────────────────────────────────────────

/// The bounded working set `(question, R_{i-1}, O_{i-1})` a round is built from.
///
/// The model never sees the trajectory; every prompt is reconstructed from
/// this state alone.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkspaceState {
    pub question: String,
    /// Round about to run (1-based).
    pub round: u32,
    /// Report written by the previous round. Replaced, never appended.
    pub prior_report: String,
    /// Rendered observations of the previous round.
    pub prior_tool_result: String,
}

impl WorkspaceState {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            round: 1,
            prior_report: String::new(),
            prior_tool_result: String::new(),
        }
    }

    /// Fold a finished round in and move to the next one. An empty report
    /// keeps the previous one.
    pub fn advance(&mut self, report: &str, tool_result: String) {
        if !report.trim().is_empty() {
            self.prior_report = report.trim().to_string();
        }
        self.prior_tool_result = tool_result;
        self.round += 1;
    }
}

// ─────────────────────────────────────────────
// Actions
// ─────────────────────────────────────────────

/// A tool invocation normalized from either wire protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub arguments: HashMap<String, Value>,
    /// The text the call was parsed from (tag body or function arguments).
    pub raw_text: String,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, arguments: HashMap<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            raw_text: String::new(),
        }
    }

    /// Arguments serialized with sorted keys, so equal calls compare equal.
    pub fn canonical_arguments(&self) -> String {
        let sorted: std::collections::BTreeMap<_, _> = self.arguments.iter().collect();
        serde_json::to_string(&sorted).unwrap_or_default()
    }
}

/// What a round decided to do.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoundAction {
    ToolCalls { calls: Vec<ToolCall> },
    FinalAnswer { answer: String },
    Terminate { reason: String },
    /// Planner replaced the outline.
    WriteOutline { outline: String },
    /// Writer produced a section.
    WriteSection { section: String },
    /// The response held no usable action.
    ParseError { message: String },
}

/// Result of one tool call (or of a failed parse) as the model will see it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub source_tool: String,
    pub content: String,
    pub is_error: bool,
    pub round: u32,
}

impl Observation {
    pub fn ok(source_tool: impl Into<String>, content: impl Into<String>, round: u32) -> Self {
        Self {
            source_tool: source_tool.into(),
            content: content.into(),
            is_error: false,
            round,
        }
    }

    pub fn error(source_tool: impl Into<String>, content: impl Into<String>, round: u32) -> Self {
        Self {
            source_tool: source_tool.into(),
            content: content.into(),
            is_error: true,
            round,
        }
    }
}

/// One entry of the append-only trajectory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: u32,
    pub plan: String,
    pub report: String,
    pub action: RoundAction,
    pub observations: Vec<Observation>,
    /// Set on the extra call made to force a final answer.
    #[serde(default)]
    pub forced: bool,
    pub timestamp: DateTime<Utc>,
}

// ─────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Answer,
    MaxRounds,
    Timeout,
    Error,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Termination::Answer => "answer",
            Termination::MaxRounds => "max_rounds",
            Termination::Timeout => "timeout",
            Termination::Error => "error",
        };
        f.write_str(s)
    }
}

/// What every research run returns. `prediction` is never empty.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentResult {
    pub question: String,
    pub prediction: String,
    /// The last report the run produced.
    pub report: String,
    pub termination: Termination,
    pub trajectory: Vec<RoundRecord>,
    pub elapsed_seconds: f64,
}

/// First non-blank candidate, or the apology string.
pub fn best_effort_prediction<'a>(candidates: impl IntoIterator<Item = &'a str>) -> String {
    candidates
        .into_iter()
        .map(str::trim)
        .find(|c| !c.is_empty())
        .unwrap_or(APOLOGY_ANSWER)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_workspace_advance_replaces_report() {
        let mut state = WorkspaceState::new("q");
        assert_eq!(state.round, 1);
        assert!(state.prior_report.is_empty());

        state.advance("  first report ", "obs 1".into());
        assert_eq!(state.round, 2);
        assert_eq!(state.prior_report, "first report");

        state.advance("second", "obs 2".into());
        assert_eq!(state.prior_report, "second");
        assert_eq!(state.prior_tool_result, "obs 2");
    }

    #[test]
    fn test_workspace_blank_report_keeps_previous() {
        let mut state = WorkspaceState::new("q");
        state.advance("kept", String::new());
        state.advance("   ", "obs".into());
        assert_eq!(state.prior_report, "kept");
        assert_eq!(state.round, 3);
    }

    #[test]
    fn test_canonical_arguments_sorted() {
        let mut a = HashMap::new();
        a.insert("z".to_string(), json!(1));
        a.insert("a".to_string(), json!(["x"]));
        let call = ToolCall::new("retrieve", a);
        assert_eq!(call.canonical_arguments(), r#"{"a":["x"],"z":1}"#);
    }

    #[test]
    fn test_action_serialization() {
        let action = RoundAction::FinalAnswer { answer: "42".into() };
        let v = serde_json::to_value(&action).unwrap();
        assert_eq!(v["kind"], "final_answer");
        assert_eq!(v["answer"], "42");
        assert_eq!(serde_json::to_value(Termination::MaxRounds).unwrap(), "max_rounds");
    }

    #[test]
    fn test_best_effort_prediction() {
        assert_eq!(best_effort_prediction(["", "  ", "report"]), "report");
        assert_eq!(best_effort_prediction(["", " "]), APOLOGY_ANSWER);
        assert_eq!(best_effort_prediction([]), APOLOGY_ANSWER);
    }
}

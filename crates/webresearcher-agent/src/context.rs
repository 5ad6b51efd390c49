//! Context builder: reconstructs the bounded message list for each round.
//!
//! Nothing here reads the trajectory. Every call starts from the small
//! workspace state, lays it out as named sections of one user message, and
//! trims the trimmable sections until the estimate fits `max_input_tokens`.

use webresearcher_core::types::Message;
use webresearcher_core::utils::take_chars;

use crate::error::ContextError;
use crate::research::{WorkspaceState, EMPTY_OBSERVATION_PLACEHOLDER, EMPTY_REPORT_PLACEHOLDER};

const TRUNCATION_MARKER: &str = "\n...[truncated]";
const PER_MESSAGE_OVERHEAD: usize = 4;
const REPLY_PRIMING: usize = 3;

// ─────────────────────────────────────────────
// Token estimation
// ─────────────────────────────────────────────

/// Deterministic, deliberately pessimistic token estimate.
///
/// ASCII text averages about four characters per token; counting three
/// keeps a margin. Any non-ASCII character counts as a full token, which
/// over-estimates CJK and emoji rather than under-estimating them.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokenEstimator;

impl TokenEstimator {
    pub fn text(&self, text: &str) -> usize {
        let (ascii, other) = text
            .chars()
            .fold((0usize, 0usize), |(a, o), c| if c.is_ascii() { (a + 1, o) } else { (a, o + 1) });
        ascii.div_ceil(3) + other
    }

    pub fn message(&self, message: &Message) -> usize {
        let mut tokens = PER_MESSAGE_OVERHEAD + self.text(message.text());
        if let Message::Assistant {
            tool_calls: Some(calls), ..
        } = message
        {
            for call in calls {
                tokens += PER_MESSAGE_OVERHEAD + self.text(&call.function.name) + self.text(&call.function.arguments);
            }
        }
        tokens
    }

    pub fn messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.message(m)).sum::<usize>() + REPLY_PRIMING
    }
}

// ─────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────

/// One labelled block of the user message.
#[derive(Clone, Debug)]
pub struct Section {
    /// Printed verbatim before the body, separator included.
    pub header: String,
    pub body: String,
    /// `None` means never trimmed. Lower values are trimmed first.
    pub trim_priority: Option<u8>,
    /// Hard character cap applied before any budget arithmetic.
    pub max_chars: Option<usize>,
}

impl Section {
    pub fn fixed(header: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            body: body.into(),
            trim_priority: None,
            max_chars: None,
        }
    }

    pub fn trimmable(header: impl Into<String>, body: impl Into<String>, priority: u8) -> Self {
        Self {
            header: header.into(),
            body: body.into(),
            trim_priority: Some(priority),
            max_chars: None,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = Some(max_chars);
        self
    }
}

fn render(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| format!("{}{}", s.header, s.body))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Cut `text` so that it plus the marker fits in `budget` tokens.
pub fn truncate_to_fit(text: &str, budget: usize, estimator: &TokenEstimator) -> String {
    if estimator.text(text) <= budget {
        return text.to_string();
    }
    let marker_cost = estimator.text(TRUNCATION_MARKER);
    if marker_cost > budget {
        return String::new();
    }
    let room = budget - marker_cost;
    let (mut lo, mut hi) = (0usize, text.chars().count());
    while lo < hi {
        let mid = (lo + hi).div_ceil(2);
        if estimator.text(take_chars(text, mid)) <= room {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    format!("{}{TRUNCATION_MARKER}", take_chars(text, lo))
}

// ─────────────────────────────────────────────
// Context manager
// ─────────────────────────────────────────────

/// Builds `[system, user(sections), ...tail]` within a token budget.
#[derive(Clone, Debug)]
pub struct ContextManager {
    system_prompt: String,
    max_input_tokens: usize,
    max_report_chars: usize,
    estimator: TokenEstimator,
}

impl ContextManager {
    pub fn new(system_prompt: impl Into<String>, max_input_tokens: usize, max_report_chars: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            max_input_tokens,
            max_report_chars,
            estimator: TokenEstimator,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Workspace layout for the iterative research loop. The tool result is
    /// trimmed before the report; the question never is.
    pub fn build_messages(&self, state: &WorkspaceState, tail: &[Message]) -> Result<Vec<Message>, ContextError> {
        let report = if state.prior_report.is_empty() {
            EMPTY_REPORT_PLACEHOLDER
        } else {
            state.prior_report.as_str()
        };
        let observation = if state.prior_tool_result.is_empty() {
            EMPTY_OBSERVATION_PLACEHOLDER
        } else {
            state.prior_tool_result.as_str()
        };

        let sections = vec![
            Section::fixed("**Question:** ", state.question.as_str()),
            Section::trimmable("**Current Report (R_{i-1}):**\n", report, 1).with_max_chars(self.max_report_chars),
            Section::trimmable("**Last Observation (O_{i-1}):**\n", observation, 0),
        ];
        self.compose(sections, tail)
    }

    /// Lay out arbitrary sections under the budget.
    pub fn compose(&self, mut sections: Vec<Section>, tail: &[Message]) -> Result<Vec<Message>, ContextError> {
        let est = &self.estimator;
        let budget = self.max_input_tokens;

        for section in sections.iter_mut() {
            if let Some(cap) = section.max_chars {
                if section.body.chars().count() > cap {
                    section.body = format!("{}{TRUNCATION_MARKER}", take_chars(&section.body, cap));
                }
            }
        }

        let trimmable: Vec<usize> = {
            let mut idx: Vec<usize> = (0..sections.len())
                .filter(|&i| sections[i].trim_priority.is_some())
                .collect();
            idx.sort_by_key(|&i| sections[i].trim_priority);
            idx
        };

        let frame: Vec<Section> = sections
            .iter()
            .map(|s| Section {
                body: if s.trim_priority.is_some() { String::new() } else { s.body.clone() },
                ..s.clone()
            })
            .collect();
        let fixed = est.messages(&self.assemble(&frame, tail));
        if fixed > budget {
            return Err(ContextError { required: fixed, budget });
        }

        // Per-piece ceiling rounding can add one token at each section seam.
        let slack = 2 * sections.len() + 1;
        let available = budget.saturating_sub(fixed + slack);

        let mut costs: Vec<usize> = sections.iter().map(|s| est.text(&s.body)).collect();
        for &i in &trimmable {
            let used: usize = trimmable.iter().map(|&j| costs[j]).sum();
            if used <= available {
                break;
            }
            let others = used - costs[i];
            let allowed = available.saturating_sub(others);
            sections[i].body = truncate_to_fit(&sections[i].body, allowed, est);
            costs[i] = est.text(&sections[i].body);
        }

        let messages = self.assemble(&sections, tail);
        if est.messages(&messages) <= budget {
            return Ok(messages);
        }
        // Unreachable with the slack above, kept so the bound holds regardless.
        Ok(self.assemble(&frame, tail))
    }

    fn assemble(&self, sections: &[Section], tail: &[Message]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2 + tail.len());
        messages.push(Message::system(self.system_prompt.clone()));
        messages.push(Message::user(render(sections)));
        messages.extend_from_slice(tail);
        messages
    }
}

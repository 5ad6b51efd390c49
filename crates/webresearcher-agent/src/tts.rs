//! Test-time scaling: several independent research runs, reduced to one answer.
//!
//! Every run gets its own [`ResearchAgent`] (own state, own trajectory) and
//! its own tokio task. Runs that error or time out are excluded. The rest are
//! reduced by a strict-majority vote over normalized predictions, or failing
//! that, by one synthesis call that reconciles all of them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use webresearcher_core::config::Config;
use webresearcher_core::types::Message;
use webresearcher_providers::{LlmProvider, LlmRequestConfig};

use crate::events::{EventSink, ResearchEvent};
use crate::iter_research::{call_until, ModelCall, ResearchAgent};
use crate::prompts::{synthesis_user_prompt, SYNTHESIS_SYSTEM_PROMPT};
use crate::protocol::extract_tag;
use crate::research::{best_effort_prediction, AgentResult, Termination};
use crate::tools::ToolDispatcher;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsMethod {
    /// A strict majority of successful runs agreed.
    Majority,
    /// One extra model call reconciled the runs.
    Synthesis,
    /// Synthesis failed; the first successful run was used.
    Fallback,
    /// No run succeeded.
    AllFailed,
}

impl std::fmt::Display for TtsMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TtsMethod::Majority => "majority",
            TtsMethod::Synthesis => "synthesis",
            TtsMethod::Fallback => "fallback",
            TtsMethod::AllFailed => "all_failed",
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TtsResult {
    pub result: AgentResult,
    pub runs: Vec<AgentResult>,
    pub method: TtsMethod,
}

/// Rough cost relative to one single-agent run.
pub fn estimate_cost(num_agents: usize) -> String {
    format!("{:.1}x", num_agents as f64 + 0.5)
}

/// Lowercase, drop punctuation and collapse whitespace.
pub fn normalize_answer(answer: &str) -> String {
    answer
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Index of a run whose normalized prediction a strict majority shares.
fn majority(runs: &[&AgentResult]) -> Option<usize> {
    if runs.len() < 2 {
        return None;
    }
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (i, run) in runs.iter().enumerate() {
        let key = normalize_answer(&run.prediction);
        if key.is_empty() {
            continue;
        }
        counts.entry(key).or_insert((0, i)).0 += 1;
    }
    counts
        .into_values()
        .find(|(count, _)| count * 2 > runs.len())
        .map(|(_, first)| first)
}

/// Runs that errored or hit the run deadline take no part in aggregation.
fn counts_as_success(run: &AgentResult) -> bool {
    matches!(run.termination, Termination::Answer | Termination::MaxRounds)
}

pub struct TtsAgent {
    provider: Arc<dyn LlmProvider>,
    dispatcher: Arc<ToolDispatcher>,
    config: Config,
    events: EventSink,
}

impl TtsAgent {
    pub fn new(provider: Arc<dyn LlmProvider>, dispatcher: Arc<ToolDispatcher>, config: &Config) -> Self {
        Self {
            provider,
            dispatcher,
            config: config.clone(),
            events: EventSink::none(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub async fn run(&self, question: &str, num_agents: usize) -> TtsResult {
        self.run_with_cancel(question, num_agents, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(&self, question: &str, num_agents: usize, cancel: CancellationToken) -> TtsResult {
        let num_agents = num_agents.max(1);
        let base = self.config.llm.temperature;
        let step = self.config.tts.temperature_step;
        info!(num_agents, cost = %estimate_cost(num_agents), "test-time scaling started");

        let handles: Vec<_> = (0..num_agents)
            .map(|i| {
                let agent = ResearchAgent::new(self.provider.clone(), self.dispatcher.clone(), &self.config)
                    .with_temperature(base + i as f64 * step)
                    .with_events(self.events.clone());
                let question = question.to_string();
                let cancel = cancel.child_token();
                tokio::spawn(async move { agent.run_with_cancel(&question, cancel).await })
            })
            .collect();

        let mut runs = Vec::with_capacity(num_agents);
        for (i, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(run) => {
                    info!(agent = i, termination = %run.termination, "parallel run finished");
                    runs.push(run);
                }
                Err(e) => error!(agent = i, error = %e, "parallel run panicked, excluded"),
            }
        }

        let (result, method) = self.aggregate(question, &runs, &cancel).await;
        info!(method = %method, termination = %result.termination, "test-time scaling finished");
        self.events.emit(ResearchEvent::Final {
            prediction: result.prediction.clone(),
            termination: result.termination,
        });
        TtsResult { result, runs, method }
    }

    async fn aggregate(&self, question: &str, runs: &[AgentResult], cancel: &CancellationToken) -> (AgentResult, TtsMethod) {
        let successful: Vec<&AgentResult> = runs.iter().filter(|r| counts_as_success(r)).collect();

        let Some(first) = successful.first() else {
            warn!(runs = runs.len(), "every parallel run failed");
            let result = match runs.first() {
                Some(run) => AgentResult {
                    termination: Termination::Error,
                    ..run.clone()
                },
                None => AgentResult {
                    question: question.to_string(),
                    prediction: best_effort_prediction([""]),
                    report: String::new(),
                    termination: Termination::Error,
                    trajectory: Vec::new(),
                    elapsed_seconds: 0.0,
                },
            };
            return (result, TtsMethod::AllFailed);
        };

        if let Some(i) = majority(&successful) {
            info!(agreeing_with = i, "majority answer found");
            return ((*successful[i]).clone(), TtsMethod::Majority);
        }

        match self.synthesize(question, &successful, cancel).await {
            Some(answer) => (
                AgentResult {
                    prediction: answer,
                    termination: Termination::Answer,
                    ..(*first).clone()
                },
                TtsMethod::Synthesis,
            ),
            None => ((*first).clone(), TtsMethod::Fallback),
        }
    }

    /// One reconciling model call. `None` when it fails or says nothing.
    async fn synthesize(&self, question: &str, runs: &[&AgentResult], cancel: &CancellationToken) -> Option<String> {
        self.events.status(format!("synthesizing {} answers", runs.len()));
        let listing: Vec<(String, String, String)> = runs
            .iter()
            .map(|r| (r.termination.to_string(), r.prediction.clone(), r.report.clone()))
            .collect();
        let messages = [
            Message::system(SYNTHESIS_SYSTEM_PROMPT),
            Message::user(synthesis_user_prompt(question, &listing)),
        ];
        let request = LlmRequestConfig::from_config(&self.config.llm).with_temperature(self.config.tts.synthesis_temperature);
        let model = if self.config.llm.model.is_empty() {
            self.provider.default_model().to_string()
        } else {
            self.config.llm.model.clone()
        };
        let budget = Duration::from_secs(self.config.llm.timeout_secs);

        let response = call_until(
            self.provider.as_ref(),
            ModelCall {
                messages: &messages,
                tools: None,
                model: &model,
                request: &request,
            },
            Instant::now() + budget,
            budget,
            cancel,
        )
        .await;

        match response {
            Ok(r) => {
                let text = r.content_str();
                extract_tag(text, "answer")
                    .or_else(|| extract_tag(text, "report"))
                    .or_else(|| Some(text.trim().to_string()).filter(|t| !t.is_empty()))
            }
            Err(e) => {
                warn!(error = %e, "synthesis call failed, falling back");
                None
            }
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

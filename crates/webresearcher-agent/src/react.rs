//! Multi-turn ReAct baseline.
//!
//! The whole conversation is kept and re-sent on every turn: assistant
//! replies and `<tool_response>` blocks accumulate in one message list,
//! which is exactly the growth the IterResearch loop avoids. A token guard
//! ends the run with a forced answer once the history outgrows the input
//! budget.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use webresearcher_core::config::{Config, ProtocolKind};
use webresearcher_core::types::{LlmResponse, Message};
use webresearcher_providers::{LlmProvider, LlmRequestConfig};

use crate::context::{truncate_to_fit, TokenEstimator};
use crate::error::ResearchError;
use crate::events::{EventSink, ResearchEvent};
use crate::iter_research::{call_until, ModelCall};
use crate::prompts::{react_forced_answer_instruction, react_system_prompt, REACT_CONTINUE_PROMPT};
use crate::protocol::{extract_tag, parse_response, render_observations, ParsedAction, OBS_START};
use crate::research::{best_effort_prediction, AgentResult, Observation, RoundAction, RoundRecord, Termination};
use crate::tools::ToolDispatcher;

const PHASE: &str = "react";

#[derive(Clone, Debug, Serialize)]
pub struct ReactResult {
    #[serde(flatten)]
    pub result: AgentResult,
    /// The full conversation, system prompt included.
    pub messages: Vec<Message>,
}

struct Conversation {
    messages: Vec<Message>,
    trajectory: Vec<RoundRecord>,
    round: u32,
    failures: u32,
    /// Latest `<think>` block or untagged prose.
    last_thought: String,
}

impl Conversation {
    fn record(&mut self, think: String, action: RoundAction, observations: Vec<Observation>, forced: bool) {
        self.trajectory.push(RoundRecord {
            round: self.round,
            plan: think,
            report: String::new(),
            action,
            observations,
            forced,
            timestamp: Utc::now(),
        });
        self.round += 1;
    }
}

/// Text before the first `<tool_response>`; anything after it was made up
/// by the model.
fn strip_after_observation(text: &str) -> &str {
    match text.find(OBS_START) {
        Some(i) => text[..i].trim(),
        None => text.trim(),
    }
}

// ─────────────────────────────────────────────
// ReactAgent
// ─────────────────────────────────────────────

pub struct ReactAgent {
    provider: Arc<dyn LlmProvider>,
    dispatcher: Arc<ToolDispatcher>,
    model: String,
    request: LlmRequestConfig,
    system_prompt: String,
    instruction: String,
    max_rounds: u32,
    run_timeout: Duration,
    forced_timeout: Duration,
    max_input_tokens: usize,
    max_failures: u32,
    estimator: TokenEstimator,
    events: EventSink,
}

impl ReactAgent {
    pub fn new(provider: Arc<dyn LlmProvider>, dispatcher: Arc<ToolDispatcher>, config: &Config) -> Self {
        let agent = &config.agent;
        let system_prompt = react_system_prompt(
            &webresearcher_core::utils::today_date(),
            &dispatcher.get_definitions(),
            &agent.instruction,
        );
        let model = if config.llm.model.is_empty() {
            provider.default_model().to_string()
        } else {
            config.llm.model.clone()
        };

        Self {
            provider,
            dispatcher,
            model,
            request: LlmRequestConfig::from_config(&config.llm).with_stop(&[OBS_START]),
            system_prompt,
            instruction: agent.instruction.clone(),
            max_rounds: agent.max_rounds,
            run_timeout: Duration::from_secs(agent.agent_timeout_secs),
            forced_timeout: Duration::from_secs(config.llm.timeout_secs.max(1)),
            max_input_tokens: agent.max_input_tokens,
            max_failures: agent.max_consecutive_failures.max(1),
            estimator: TokenEstimator,
            events: EventSink::none(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub async fn run(&self, question: &str) -> ReactResult {
        self.run_with_cancel(question, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(&self, question: &str, cancel: CancellationToken) -> ReactResult {
        let started = Instant::now();
        let deadline = started + self.run_timeout;
        info!(model = %self.model, max_rounds = self.max_rounds, "react run started");

        let mut conv = Conversation {
            messages: vec![Message::system(self.system_prompt.clone()), Message::user(question)],
            trajectory: Vec::new(),
            round: 1,
            failures: 0,
            last_thought: String::new(),
        };

        let (prediction, termination) = match self.turn_loop(&mut conv, deadline, &cancel).await {
            Ok(answer) => (
                best_effort_prediction([answer.as_str(), conv.last_thought.as_str()]),
                Termination::Answer,
            ),
            Err(err) => {
                let (force, termination) = match &err {
                    ResearchError::RoundBudgetExhausted(_) | ResearchError::HistoryTooLong { .. } => {
                        (true, Termination::MaxRounds)
                    }
                    ResearchError::RunTimeout(_) => (true, Termination::Timeout),
                    ResearchError::TooManyFailures(_) => (true, Termination::Error),
                    _ => (false, Termination::Error),
                };
                warn!(error = %err, termination = %termination, "react loop ended without an answer");

                let forced = if force { self.forced_answer(&mut conv, &cancel).await } else { None };
                (
                    best_effort_prediction([forced.as_deref().unwrap_or(""), conv.last_thought.as_str()]),
                    termination,
                )
            }
        };

        let elapsed = started.elapsed().as_secs_f64();
        info!(termination = %termination, turns = conv.trajectory.len(), messages = conv.messages.len(), "react run finished");
        self.events.emit(ResearchEvent::Final {
            prediction: prediction.clone(),
            termination,
        });

        ReactResult {
            result: AgentResult {
                question: question.to_string(),
                prediction,
                report: conv.last_thought,
                termination,
                trajectory: conv.trajectory,
                elapsed_seconds: elapsed,
            },
            messages: conv.messages,
        }
    }

    async fn turn_loop(&self, conv: &mut Conversation, deadline: Instant, cancel: &CancellationToken) -> Result<String, ResearchError> {
        loop {
            if cancel.is_cancelled() {
                return Err(ResearchError::Cancelled);
            }
            if conv.round > self.max_rounds {
                return Err(ResearchError::RoundBudgetExhausted(self.max_rounds));
            }
            if Instant::now() >= deadline {
                return Err(ResearchError::RunTimeout(self.run_timeout.as_secs()));
            }
            let tokens = self.estimator.messages(&conv.messages);
            if tokens > self.max_input_tokens {
                return Err(ResearchError::HistoryTooLong {
                    tokens,
                    budget: self.max_input_tokens,
                });
            }

            let round = conv.round;
            debug!(round, tokens, "LLM call");
            let response = call_until(
                self.provider.as_ref(),
                ModelCall {
                    messages: &conv.messages,
                    tools: None,
                    model: &self.model,
                    request: &self.request,
                },
                deadline,
                self.run_timeout,
                cancel,
            )
            .await?;

            let text = strip_after_observation(response.content_str()).to_string();
            let parsed = parse_response(&LlmResponse::text(text.clone()), ProtocolKind::Tagged);
            let think = extract_tag(&text, "think").unwrap_or(parsed.plan);
            if !think.is_empty() {
                conv.last_thought = think.clone();
            }
            conv.messages.push(Message::assistant(text.clone()));

            match parsed.action {
                ParsedAction::Answer(answer) => {
                    info!(round, "final answer received");
                    self.emit_round(round, &think, "answer");
                    conv.record(think, RoundAction::FinalAnswer { answer: answer.clone() }, Vec::new(), false);
                    return Ok(answer);
                }
                ParsedAction::Terminate(reason) => {
                    info!(round, "terminate received");
                    self.emit_round(round, &think, "terminate");
                    conv.record(think, RoundAction::Terminate { reason: reason.clone() }, Vec::new(), false);
                    return Ok(if reason.is_empty() { text } else { reason });
                }
                ParsedAction::ToolCalls { calls, errors } if !calls.is_empty() => {
                    let names: Vec<&str> = calls.iter().map(|c| c.tool_name.as_str()).collect();
                    self.emit_round(round, &think, &names.join(","));

                    let mut observations: Vec<Observation> = errors
                        .into_iter()
                        .map(|e| Observation::error("parser", format!("Error: {}", ResearchError::Parse(e)), round))
                        .collect();

                    let executed = tokio::select! {
                        obs = self.dispatcher.execute_batch(&calls, round, cancel) => Some(obs),
                        _ = tokio::time::sleep_until(deadline) => None,
                    };
                    let Some(executed) = executed else {
                        warn!(round, "run deadline hit during tool execution, results discarded");
                        conv.record(think, RoundAction::ToolCalls { calls }, observations, false);
                        return Err(ResearchError::RunTimeout(self.run_timeout.as_secs()));
                    };
                    if cancel.is_cancelled() {
                        conv.record(think, RoundAction::ToolCalls { calls }, observations, false);
                        return Err(ResearchError::Cancelled);
                    }
                    for obs in &executed {
                        self.events.tool(PHASE, round, &obs.source_tool, obs.is_error, &obs.content);
                    }
                    observations.extend(executed);

                    if observations.iter().all(|o| o.is_error) {
                        conv.failures += 1;
                    } else {
                        conv.failures = 0;
                    }
                    conv.messages.push(Message::user(render_observations(&observations)));
                    conv.record(think, RoundAction::ToolCalls { calls }, observations, false);
                }
                ParsedAction::ToolCalls { errors, .. } => {
                    let message = errors.join("; ");
                    warn!(round, error = %message, "could not parse tool call");
                    self.emit_round(round, &think, "parse_error");
                    conv.failures += 1;
                    let observation = Observation::error("parser", format!("Error: {}", ResearchError::Parse(message.clone())), round);
                    conv.messages.push(Message::user(render_observations(std::slice::from_ref(&observation))));
                    conv.record(think, RoundAction::ParseError { message }, vec![observation], false);
                }
                ParsedAction::Missing => {
                    // Plain reasoning without an action is allowed; only the budgets bound it.
                    debug!(round, "no action, asking to continue");
                    self.emit_round(round, &think, "continue");
                    if think.is_empty() && !text.is_empty() {
                        conv.last_thought = text;
                    }
                    conv.messages.push(Message::user(REACT_CONTINUE_PROMPT));
                    conv.record(
                        think,
                        RoundAction::ParseError {
                            message: "no tool call or answer".into(),
                        },
                        Vec::new(),
                        false,
                    );
                }
            }

            if conv.failures >= self.max_failures {
                return Err(ResearchError::TooManyFailures(conv.failures));
            }
        }
    }

    /// The history plus `tail`, or when that is over budget: system prompt,
    /// question, as much of the latest turn as fits, and `tail`.
    fn final_call_messages(&self, history: &[Message], tail: &Message) -> Vec<Message> {
        let mut messages = history.to_vec();
        messages.push(tail.clone());
        if self.estimator.messages(&messages) <= self.max_input_tokens {
            return messages;
        }

        let mut compact: Vec<Message> = history.iter().take(2).cloned().collect();
        let latest = history.iter().skip(2).last().map(|m| m.text().to_string()).unwrap_or_default();
        let mut skeleton = compact.clone();
        skeleton.push(tail.clone());
        skeleton.push(Message::user(""));
        let room = self.max_input_tokens.saturating_sub(self.estimator.messages(&skeleton));
        let latest = truncate_to_fit(&latest, room, &self.estimator);
        if !latest.is_empty() {
            compact.push(Message::user(latest));
        }
        compact.push(tail.clone());
        debug!(dropped = history.len() + 1 - compact.len(), "history compacted for the final call");
        compact
    }

    /// One extra call, without tools, demanding an answer.
    async fn forced_answer(&self, conv: &mut Conversation, cancel: &CancellationToken) -> Option<String> {
        let round = conv.round;
        info!(round, "forcing final answer");

        let tail = Message::user(react_forced_answer_instruction(&self.instruction));
        let messages = self.final_call_messages(&conv.messages, &tail);
        conv.messages.push(tail);

        let call = tokio::time::timeout(
            self.forced_timeout,
            self.provider.chat(&messages, None, &self.model, &self.request),
        );
        let response = tokio::select! {
            _ = cancel.cancelled() => None,
            outcome = call => match outcome {
                Ok(Ok(r)) => Some(r),
                Ok(Err(e)) => {
                    error!(error = %e, "forced-answer call failed");
                    None
                }
                Err(_) => {
                    warn!("forced-answer call timed out");
                    None
                }
            },
        }?;

        let text = strip_after_observation(response.content_str()).to_string();
        conv.messages.push(Message::assistant(text.clone()));
        let think = extract_tag(&text, "think").unwrap_or_default();
        let answer = extract_tag(&text, "answer").or_else(|| {
            (!text.is_empty() && !text.starts_with('<')).then(|| text.clone())
        });

        let action = match &answer {
            Some(a) => RoundAction::FinalAnswer { answer: a.clone() },
            None => RoundAction::ParseError {
                message: "forced answer held no usable text".into(),
            },
        };
        self.emit_round(round, &think, "forced_answer");
        conv.record(think, action, Vec::new(), true);
        answer
    }

    fn emit_round(&self, round: u32, think: &str, action: &str) {
        self.events.emit(ResearchEvent::Round {
            phase: PHASE.to_string(),
            round,
            plan: think.to_string(),
            report: String::new(),
            action: action.to_string(),
        });
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

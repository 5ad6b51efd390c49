//! IterResearch round controller: the single-agent research loop.
//!
//! Each round makes exactly one model call that returns a plan, a
//! rewritten report and one action. The next prompt is rebuilt from the
//! question, that report and the round's observations only, so context
//! size does not grow with the number of rounds. The full history goes
//! to the trajectory, which the model never sees.
//!
//! Every way out of the loop still produces an [`AgentResult`] with a
//! non-empty prediction: budget and time exhaustion trigger one forced
//! answer call, and everything else falls back to the last report.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use webresearcher_core::config::{Config, ProtocolKind};
use webresearcher_core::types::{LlmResponse, Message, ToolDefinition};
use webresearcher_providers::{LlmProvider, LlmRequestConfig};

use crate::context::ContextManager;
use crate::error::ResearchError;
use crate::events::{EventSink, ResearchEvent};
use crate::prompts::{forced_answer_instruction, research_system_prompt, ForceReason};
use crate::protocol::{extract_tag, parse_response, render_observations, ParsedAction, OBS_START, PARSE_ERROR_HINT};
use crate::research::{
    best_effort_prediction, AgentResult, Observation, RoundAction, RoundRecord, Termination, WorkspaceState,
};
use crate::tools::ToolDispatcher;

const PHASE: &str = "research";

/// Mutable state of one run. Never shared between runs.
struct Run {
    state: WorkspaceState,
    trajectory: Vec<RoundRecord>,
    failures: u32,
}

impl Run {
    fn record(&mut self, plan: String, report: String, action: RoundAction, observations: Vec<Observation>, forced: bool) {
        self.trajectory.push(RoundRecord {
            round: self.state.round,
            plan,
            report,
            action,
            observations,
            forced,
            timestamp: Utc::now(),
        });
    }
}

/// One model request, borrowed from the caller.
pub(crate) struct ModelCall<'a> {
    pub messages: &'a [Message],
    pub tools: Option<&'a [ToolDefinition]>,
    pub model: &'a str,
    pub request: &'a LlmRequestConfig,
}

/// Issue a model call that gives way to cancellation and to the deadline.
/// `budget` only labels the timeout error.
pub(crate) async fn call_until(
    provider: &dyn LlmProvider,
    call: ModelCall<'_>,
    deadline: Instant,
    budget: Duration,
    cancel: &CancellationToken,
) -> Result<LlmResponse, ResearchError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ResearchError::Cancelled),
        _ = tokio::time::sleep_until(deadline) => Err(ResearchError::RunTimeout(budget.as_secs())),
        result = provider.chat(call.messages, call.tools, call.model, call.request) => {
            result.map_err(ResearchError::from)
        }
    }
}

// ─────────────────────────────────────────────
// ResearchAgent
// ─────────────────────────────────────────────

pub struct ResearchAgent {
    provider: Arc<dyn LlmProvider>,
    dispatcher: Arc<ToolDispatcher>,
    model: String,
    request: LlmRequestConfig,
    protocol: ProtocolKind,
    context: ContextManager,
    tool_defs: Vec<ToolDefinition>,
    max_rounds: u32,
    run_timeout: Duration,
    /// Bound on the forced-answer call, which runs after the deadline.
    forced_timeout: Duration,
    max_failures: u32,
    events: EventSink,
}

impl ResearchAgent {
    pub fn new(provider: Arc<dyn LlmProvider>, dispatcher: Arc<ToolDispatcher>, config: &Config) -> Self {
        let agent = &config.agent;
        let tool_defs = dispatcher.get_definitions();
        let system = research_system_prompt(
            &webresearcher_core::utils::today_date(),
            &tool_defs,
            agent.protocol,
            &agent.instruction,
        );
        let mut request = LlmRequestConfig::from_config(&config.llm);
        if agent.protocol == ProtocolKind::Tagged {
            request = request.with_stop(&[OBS_START]);
        }
        let model = if config.llm.model.is_empty() {
            provider.default_model().to_string()
        } else {
            config.llm.model.clone()
        };

        Self {
            provider,
            dispatcher,
            model,
            request,
            protocol: agent.protocol,
            context: ContextManager::new(system, agent.max_input_tokens, agent.max_report_chars),
            tool_defs,
            max_rounds: agent.max_rounds,
            run_timeout: Duration::from_secs(agent.agent_timeout_secs),
            forced_timeout: Duration::from_secs(config.llm.timeout_secs.max(1)),
            max_failures: agent.max_consecutive_failures.max(1),
            events: EventSink::none(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.request.temperature = temperature;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn temperature(&self) -> f64 {
        self.request.temperature
    }

    pub async fn run(&self, question: &str) -> AgentResult {
        self.run_with_cancel(question, CancellationToken::new()).await
    }

    /// Run to completion. Cancelling `cancel` ends the run at the next
    /// suspension point with `termination = error`.
    pub async fn run_with_cancel(&self, question: &str, cancel: CancellationToken) -> AgentResult {
        let started = Instant::now();
        let deadline = started + self.run_timeout;
        info!(model = %self.model, protocol = ?self.protocol, max_rounds = self.max_rounds, "research run started");

        let mut run = Run {
            state: WorkspaceState::new(question),
            trajectory: Vec::new(),
            failures: 0,
        };

        let (prediction, termination) = match self.round_loop(&mut run, deadline, &cancel).await {
            Ok(answer) => (best_effort_prediction([answer.as_str(), run.state.prior_report.as_str()]), Termination::Answer),
            Err(err) => {
                let (force, termination) = match &err {
                    ResearchError::RoundBudgetExhausted(_) => (Some(ForceReason::MaxRounds), Termination::MaxRounds),
                    ResearchError::RunTimeout(_) => (Some(ForceReason::Timeout), Termination::Timeout),
                    ResearchError::TooManyFailures(_) => (Some(ForceReason::Failures), Termination::Error),
                    ResearchError::ModelClient(_) => {
                        error!(error = %err, "model client failed, returning best-effort result");
                        (None, Termination::Error)
                    }
                    _ => (None, Termination::Error),
                };
                warn!(error = %err, termination = %termination, "research loop ended without an answer");

                let forced = match force {
                    Some(reason) => self.forced_answer(&mut run, reason, &cancel).await,
                    None => None,
                };
                (
                    best_effort_prediction([forced.as_deref().unwrap_or(""), run.state.prior_report.as_str()]),
                    termination,
                )
            }
        };

        let elapsed = started.elapsed().as_secs_f64();
        info!(termination = %termination, rounds = run.trajectory.len(), elapsed_secs = elapsed, "research run finished");
        self.events.emit(ResearchEvent::Final {
            prediction: prediction.clone(),
            termination,
        });

        AgentResult {
            question: question.to_string(),
            prediction,
            report: run.state.prior_report,
            termination,
            trajectory: run.trajectory,
            elapsed_seconds: elapsed,
        }
    }

    // ────────────── Round loop ──────────────

    async fn round_loop(&self, run: &mut Run, deadline: Instant, cancel: &CancellationToken) -> Result<String, ResearchError> {
        loop {
            if cancel.is_cancelled() {
                return Err(ResearchError::Cancelled);
            }
            if run.state.round > self.max_rounds {
                return Err(ResearchError::RoundBudgetExhausted(self.max_rounds));
            }
            if Instant::now() >= deadline {
                return Err(ResearchError::RunTimeout(self.run_timeout.as_secs()));
            }

            let round = run.state.round;
            debug!(round, "LLM call");
            let messages = self.context.build_messages(&run.state, &[])?;
            let response = self.call_model(&messages, deadline, cancel).await?;
            let parsed = parse_response(&response, self.protocol);

            match parsed.action {
                ParsedAction::Answer(answer) => {
                    info!(round, "final answer received");
                    self.emit_round(round, &parsed.plan, &parsed.report, "answer");
                    run.record(
                        parsed.plan,
                        parsed.report.clone(),
                        RoundAction::FinalAnswer { answer: answer.clone() },
                        Vec::new(),
                        false,
                    );
                    run.state.advance(&parsed.report, String::new());
                    return Ok(answer);
                }
                ParsedAction::Terminate(reason) => {
                    info!(round, reason = %reason, "terminate received");
                    self.emit_round(round, &parsed.plan, &parsed.report, "terminate");
                    run.record(
                        parsed.plan,
                        parsed.report.clone(),
                        RoundAction::Terminate { reason: reason.clone() },
                        Vec::new(),
                        false,
                    );
                    run.state.advance(&parsed.report, String::new());
                    return Ok(if reason.is_empty() { run.state.prior_report.clone() } else { reason });
                }
                ParsedAction::ToolCalls { calls, errors } if !calls.is_empty() => {
                    let names: Vec<&str> = calls.iter().map(|c| c.tool_name.as_str()).collect();
                    self.emit_round(round, &parsed.plan, &parsed.report, &names.join(","));

                    let mut observations: Vec<Observation> = errors
                        .iter()
                        .map(|e| {
                            warn!(round, error = %e, "malformed tool call");
                            Observation::error("parser", format!("Error: {}", ResearchError::Parse(e.clone())), round)
                        })
                        .collect();

                    let batch = self.dispatcher.execute_batch(&calls, round, cancel);
                    let executed = tokio::select! {
                        obs = batch => Some(obs),
                        _ = tokio::time::sleep_until(deadline) => None,
                    };
                    let Some(executed) = executed else {
                        warn!(round, "run deadline hit during tool execution, results discarded");
                        run.record(parsed.plan, parsed.report.clone(), RoundAction::ToolCalls { calls }, observations, false);
                        run.state.advance(&parsed.report, String::new());
                        return Err(ResearchError::RunTimeout(self.run_timeout.as_secs()));
                    };
                    if cancel.is_cancelled() {
                        warn!(round, "cancelled during tool execution, results discarded");
                        run.record(parsed.plan, parsed.report.clone(), RoundAction::ToolCalls { calls }, observations, false);
                        run.state.advance(&parsed.report, String::new());
                        return Err(ResearchError::Cancelled);
                    }
                    for obs in &executed {
                        self.events.tool(PHASE, round, &obs.source_tool, obs.is_error, &obs.content);
                    }
                    observations.extend(executed);

                    if observations.iter().all(|o| o.is_error) {
                        run.failures += 1;
                    } else {
                        run.failures = 0;
                    }
                    let rendered = render_observations(&observations);
                    run.record(parsed.plan, parsed.report.clone(), RoundAction::ToolCalls { calls }, observations, false);
                    run.state.advance(&parsed.report, rendered);
                }
                ParsedAction::ToolCalls { errors, .. } => {
                    let message = errors.join("; ");
                    warn!(round, error = %message, "could not parse tool call");
                    self.parse_failure(run, parsed.plan, parsed.report, format!("Error: {}. {PARSE_ERROR_HINT}", ResearchError::Parse(message)));
                }
                ParsedAction::Missing => {
                    warn!(round, "response held no action");
                    self.parse_failure(run, parsed.plan, parsed.report, PARSE_ERROR_HINT.to_string());
                }
            }

            if run.failures >= self.max_failures {
                return Err(ResearchError::TooManyFailures(run.failures));
            }
        }
    }

    fn parse_failure(&self, run: &mut Run, plan: String, report: String, message: String) {
        let round = run.state.round;
        self.emit_round(round, &plan, &report, "parse_error");
        run.failures += 1;
        let observation = Observation::error("parser", message.clone(), round);
        let rendered = render_observations(std::slice::from_ref(&observation));
        run.record(plan, report.clone(), RoundAction::ParseError { message }, vec![observation], false);
        run.state.advance(&report, rendered);
    }

    async fn call_model(
        &self,
        messages: &[Message],
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<LlmResponse, ResearchError> {
        let tools = match self.protocol {
            ProtocolKind::Function if !self.tool_defs.is_empty() => Some(self.tool_defs.as_slice()),
            _ => None,
        };
        call_until(
            self.provider.as_ref(),
            ModelCall {
                messages,
                tools,
                model: &self.model,
                request: &self.request,
            },
            deadline,
            self.run_timeout,
            cancel,
        )
        .await
    }

    // ────────────── Forced final answer ──────────────

    /// One extra call, without tools, demanding an answer. Recorded as the
    /// next round. `None` when the call fails or yields nothing usable.
    async fn forced_answer(&self, run: &mut Run, reason: ForceReason, cancel: &CancellationToken) -> Option<String> {
        let round = run.state.round;
        info!(round, reason = ?reason, "forcing final answer");

        let tail = [Message::user(forced_answer_instruction(reason))];
        let messages = match self.context.build_messages(&run.state, &tail) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "cannot build forced-answer context");
                return None;
            }
        };

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

        let text = response.content_str();
        let report = extract_tag(text, "report").unwrap_or_default();
        let plan = extract_tag(text, "plan").unwrap_or_default();
        let answer = extract_tag(text, "answer")
            .or_else(|| (!report.is_empty()).then(|| report.clone()))
            .or_else(|| {
                let raw = text.trim();
                (!raw.is_empty() && !raw.starts_with('<')).then(|| raw.to_string())
            });

        let action = match &answer {
            Some(a) => RoundAction::FinalAnswer { answer: a.clone() },
            None => RoundAction::ParseError {
                message: "forced answer held no usable text".into(),
            },
        };
        self.emit_round(round, &plan, &report, "forced_answer");
        run.record(plan, report.clone(), action, Vec::new(), true);
        run.state.advance(&report, String::new());
        answer
    }

    fn emit_round(&self, round: u32, plan: &str, report: &str, action: &str) {
        self.events.emit(ResearchEvent::Round {
            phase: PHASE.to_string(),
            round,
            plan: plan.to_string(),
            report: report.to_string(),
            action: action.to_string(),
        });
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::APOLOGY_ANSWER;
    use crate::testing::{reply, BrokenTool, FixedSearchTool, ScriptedProvider, SlowTool, Step};
    use crate::tools::Tool;
    use webresearcher_core::types::ToolCall as WireToolCall;
    use webresearcher_providers::ProviderError;

    const SEARCH_CALL: &str = "<plan>search</plan>\n<report>Nothing known yet.</report>\n<tool_call>\n{\"name\": \"search\", \"arguments\": {\"query\": [\"Springfield population 2020\"]}}\n</tool_call>";
    const ANSWER: &str = "<plan>done</plan>\n<report>Springfield had 30,720 residents in 2020.</report>\n<answer>30,720</answer>";

    fn config() -> Config {
        let mut config = Config::default();
        config.agent.max_rounds = 5;
        config.agent.agent_timeout_secs = 600;
        config
    }

    fn dispatcher(tools: Vec<Arc<dyn Tool>>) -> Arc<ToolDispatcher> {
        Arc::new(ToolDispatcher::from_tools(tools, &[], Duration::from_secs(30)))
    }

    fn search_tools() -> Vec<Arc<dyn Tool>> {
        vec![Arc::new(FixedSearchTool {
            snippet: "Springfield population was 30,720 at the 2020 census.".into(),
        })]
    }

    fn agent(provider: Arc<ScriptedProvider>, tools: Vec<Arc<dyn Tool>>, config: &Config) -> ResearchAgent {
        ResearchAgent::new(provider, dispatcher(tools), config)
    }

    fn assert_rounds_contiguous(result: &AgentResult) {
        for (i, record) in result.trajectory.iter().enumerate() {
            assert_eq!(record.round, i as u32 + 1);
        }
    }

    // ── happy path ──

    #[tokio::test]
    async fn test_search_then_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![reply(SEARCH_CALL), reply(ANSWER)]));
        let result = agent(provider.clone(), search_tools(), &config())
            .run("What is the population of Springfield in 2020?")
            .await;

        assert_eq!(result.termination, Termination::Answer);
        assert!(result.prediction.contains("30,720"));
        assert_eq!(result.trajectory.len(), 2);
        assert_rounds_contiguous(&result);
        assert_eq!(result.report, "Springfield had 30,720 residents in 2020.");

        let obs = &result.trajectory[0].observations;
        assert_eq!(obs.len(), 1);
        assert!(!obs[0].is_error);

        // Round 2 sees the round-1 report and the wrapped observation only.
        let calls = provider.calls();
        assert_eq!(calls.len(), 2);
        let second = calls[1].user_text();
        assert!(second.contains("**Current Report (R_{i-1}):**\nNothing known yet."));
        assert!(second.contains("<tool_response>\nA Google search for"));
        assert!(!second.contains("<plan>search</plan>"));
        assert_eq!(calls[0].stop, vec!["<tool_response>".to_string()]);
    }

    #[tokio::test]
    async fn test_first_round_uses_placeholders() {
        let provider = Arc::new(ScriptedProvider::new(vec![reply(ANSWER)]));
        agent(provider.clone(), search_tools(), &config()).run("q").await;
        let first = provider.calls()[0].user_text();
        assert!(first.contains("This is the first round. The report is empty."));
        assert!(first.contains("This is the first round. No tool has been called yet."));
    }

    #[tokio::test]
    async fn test_terminate_uses_report() {
        let provider = Arc::new(ScriptedProvider::new(vec![reply(
            "<plan>p</plan>\n<report>The final report.</report>\n<terminate></terminate>",
        )]));
        let result = agent(provider, search_tools(), &config()).run("q").await;
        assert_eq!(result.termination, Termination::Answer);
        assert_eq!(result.prediction, "The final report.");
        assert!(matches!(result.trajectory[0].action, RoundAction::Terminate { .. }));
    }

    #[tokio::test]
    async fn test_empty_report_keeps_previous() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            reply(SEARCH_CALL),
            reply("<plan>again</plan>\n<tool_call>\n{\"name\": \"search\", \"arguments\": {\"query\": \"x\"}}\n</tool_call>"),
            reply(ANSWER),
        ]));
        agent(provider.clone(), search_tools(), &config()).run("q").await;
        assert!(provider.calls()[2].user_text().contains("Nothing known yet."));
    }

    // ── budgets ──

    #[tokio::test]
    async fn test_max_rounds_forces_answer() {
        let mut config = config();
        config.agent.max_rounds = 1;
        let provider = Arc::new(ScriptedProvider::new(vec![reply(SEARCH_CALL), reply(ANSWER)]));
        let result = agent(provider.clone(), search_tools(), &config).run("q").await;

        assert_eq!(result.termination, Termination::MaxRounds);
        assert_eq!(result.prediction, "30,720");
        assert_eq!(result.trajectory.len(), 2);
        assert!(result.trajectory[1].forced);
        assert_rounds_contiguous(&result);

        let calls = provider.calls();
        let forced = calls[1].messages.last().unwrap();
        assert!(forced.text().contains("maximum allowed number of LLM calls"));
        assert_eq!(calls[1].offered_tools, 0);
    }

    #[tokio::test]
    async fn test_forced_answer_failure_falls_back_to_report() {
        let mut config = config();
        config.agent.max_rounds = 1;
        let provider = Arc::new(ScriptedProvider::new(vec![
            reply(SEARCH_CALL),
            Step::Fail(ProviderError::Status {
                status: 500,
                body: "boom".into(),
            }),
        ]));
        let result = agent(provider, search_tools(), &config).run("q").await;
        assert_eq!(result.termination, Termination::MaxRounds);
        assert_eq!(result.prediction, "Nothing known yet.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_timeout_forces_answer() {
        let mut config = config();
        config.agent.agent_timeout_secs = 10;
        let provider = Arc::new(ScriptedProvider::new(vec![
            reply(SEARCH_CALL),
            Step::Slow(Duration::from_secs(60), LlmResponse::text(ANSWER)),
            reply("<report>Late report.</report>\n<answer>about 30k</answer>"),
        ]));
        let result = agent(provider, search_tools(), &config).run("q").await;
        assert_eq!(result.termination, Termination::Timeout);
        assert_eq!(result.prediction, "about 30k");
        assert!(result.trajectory.last().unwrap().forced);
        assert_rounds_contiguous(&result);
    }

    // ── failures ──

    #[tokio::test]
    async fn test_model_failure_returns_apology() {
        let provider = Arc::new(ScriptedProvider::new(vec![Step::Fail(ProviderError::Status {
            status: 401,
            body: "bad key".into(),
        })]));
        let result = agent(provider.clone(), search_tools(), &config()).run("q").await;
        assert_eq!(result.termination, Termination::Error);
        assert_eq!(result.prediction, APOLOGY_ANSWER);
        assert!(result.trajectory.is_empty());
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_parse_errors_are_recovered() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            reply("<plan>thinking</plan>\n<report>partial</report>\nno action here"),
            reply(ANSWER),
        ]));
        let result = agent(provider.clone(), search_tools(), &config()).run("q").await;
        assert_eq!(result.termination, Termination::Answer);
        assert!(matches!(result.trajectory[0].action, RoundAction::ParseError { .. }));
        assert!(result.trajectory[0].observations[0].is_error);
        assert!(provider.calls()[1].user_text().contains("Could not parse an action"));
    }

    #[tokio::test]
    async fn test_failure_bound_forces_answer() {
        let mut config = config();
        config.agent.max_consecutive_failures = 2;
        let broken_call = "<report>r</report>\n<tool_call>\n{\"name\": \"visit\", \"arguments\": {}}\n</tool_call>";
        let provider = Arc::new(ScriptedProvider::new(vec![
            reply(broken_call),
            reply(broken_call),
            reply("<answer>best guess</answer>"),
        ]));
        let result = agent(provider, vec![Arc::new(BrokenTool)], &config).run("q").await;

        assert_eq!(result.termination, Termination::Error);
        assert_eq!(result.prediction, "best guess");
        assert_eq!(result.trajectory.len(), 3);
        assert!(result.trajectory[0].observations[0].content.contains("connection refused"));
        assert!(result.trajectory[2].forced);
    }

    #[tokio::test]
    async fn test_unknown_tool_lists_valid_names() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            reply("<report>r</report>\n<tool_call>\n{\"name\": \"browse\", \"arguments\": {}}\n</tool_call>"),
            reply(ANSWER),
        ]));
        let result = agent(provider, search_tools(), &config()).run("q").await;
        let obs = &result.trajectory[0].observations[0];
        assert!(obs.is_error);
        assert!(obs.content.contains("Valid tools: search"));
    }

    #[tokio::test]
    async fn test_cancelled_run_returns_best_effort() {
        let provider = Arc::new(ScriptedProvider::new(vec![reply(SEARCH_CALL), reply(ANSWER)]));
        let token = CancellationToken::new();
        token.cancel();
        let result = agent(provider.clone(), search_tools(), &config())
            .run_with_cancel("q", token)
            .await;
        assert_eq!(result.termination, Termination::Error);
        assert!(!result.prediction.is_empty());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_model_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            reply(SEARCH_CALL),
            Step::Slow(Duration::from_secs(60), LlmResponse::text(ANSWER)),
        ]));
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = agent(provider.clone(), search_tools(), &config())
            .run_with_cancel("q", token)
            .await;

        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(result.termination, Termination::Error);
        assert_eq!(result.prediction, "Nothing known yet.");
        assert_eq!(result.trajectory.len(), 1);
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_tool_call_discards_result() {
        let provider = Arc::new(ScriptedProvider::new(vec![reply(SEARCH_CALL), reply(ANSWER)]));
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(SlowTool {
            delay: Duration::from_secs(20),
            output: "late result".into(),
        })];
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = agent(provider.clone(), tools, &config()).run_with_cancel("q", token).await;

        assert!(started.elapsed() < Duration::from_secs(20));
        assert_eq!(result.termination, Termination::Error);
        assert!(!result.prediction.is_empty());
        assert_eq!(result.trajectory.len(), 1);
        let obs = &result.trajectory[0].observations;
        assert!(obs.iter().all(|o| o.is_error));
        assert!(obs.iter().all(|o| !o.content.contains("late result")));
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_dead_search_backend_hits_failure_bound() {
        use crate::tools::SearchTool;
        use webresearcher_core::config::ToolsConfig;
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;
        let tools_config = ToolsConfig {
            serper_api_key: "k".into(),
            serper_base_url: server.uri(),
            ..Default::default()
        };

        let mut config = config();
        config.agent.max_consecutive_failures = 2;
        let provider = Arc::new(ScriptedProvider::new(vec![
            reply(SEARCH_CALL),
            reply(SEARCH_CALL),
            reply("<answer>best guess</answer>"),
        ]));
        let result = agent(provider.clone(), vec![Arc::new(SearchTool::new(&tools_config))], &config)
            .run("q")
            .await;

        assert_eq!(result.termination, Termination::Error);
        assert_eq!(result.prediction, "best guess");
        assert!(result.trajectory[0].observations[0].is_error);
        assert!(result.trajectory[2].forced);
        assert_eq!(provider.calls().len(), 3);
    }

    // ── function calling ──

    #[tokio::test]
    async fn test_function_protocol() {
        let mut config = config();
        config.agent.protocol = ProtocolKind::Function;
        let provider = Arc::new(ScriptedProvider::new(vec![
            Step::Reply(LlmResponse {
                content: Some("<plan>p</plan>\n<report>searching</report>".into()),
                tool_calls: vec![WireToolCall::new("c1", "search", r#"{"query": ["springfield"]}"#)],
                ..Default::default()
            }),
            reply(ANSWER),
        ]));
        let result = agent(provider.clone(), search_tools(), &config).run("q").await;
        assert_eq!(result.termination, Termination::Answer);
        let calls = provider.calls();
        assert_eq!(calls[0].offered_tools, 1);
        assert!(calls[0].stop.is_empty());
        assert!(calls[1].user_text().contains("Census data"));
    }

    // ── events ──

    #[tokio::test]
    async fn test_events_emitted() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let provider = Arc::new(ScriptedProvider::new(vec![reply(SEARCH_CALL), reply(ANSWER)]));
        agent(provider, search_tools(), &config())
            .with_events(EventSink::new(tx))
            .run("q")
            .await;

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(serde_json::to_value(&event).unwrap()["type"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds, vec!["round", "tool", "round", "final"]);
    }
}

//! WebWeaver: planner/writer dual-agent research.
//!
//! The planner explores with the research tools. Everything they return is
//! stored in the memory bank, and the planner only sees citation ids and
//! summaries while it evolves a citation-grounded outline. The writer then
//! turns that outline into a report section by section, and sees evidence
//! only through `retrieve`. The phases run strictly one after the other and
//! share the bank by handle.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use webresearcher_core::config::{Config, ProtocolKind};
use webresearcher_core::types::{LlmResponse, Message, ToolDefinition};
use webresearcher_core::utils::today_date;
use webresearcher_providers::{LlmProvider, LlmRequestConfig};

use crate::context::{ContextManager, Section};
use crate::error::ResearchError;
use crate::events::{EventSink, ResearchEvent};
use crate::iter_research::{call_until, ModelCall};
use crate::memory::{MemoryBank, SharedMemoryBank};
use crate::prompts::{
    planner_system_prompt, writer_system_prompt, EMPTY_OUTLINE, LANGUAGE_NOTE, NO_OBSERVATION,
    PLANNER_FINAL_INSTRUCTION, WRITER_FINAL_INSTRUCTION, WRITER_FIRST_OBSERVATION, WRITE_NOW_HINT,
};
use crate::protocol::{extract_tag, has_tag, parse_response, render_observations, ParsedAction, OBS_START};
use crate::research::{Observation, RoundAction, RoundRecord, ToolCall};
use crate::tools::{require_string_list, EvidenceTool, RetrieveTool, Tool, ToolDispatcher};

const PLANNER_NO_ACTION: &str = "No valid action found. Use <tool_call>, <write_outline> or <terminate>.";
const WRITER_NO_ACTION: &str = "No valid action found. Use <tool_call> (retrieve), <write> or <terminate>.";

static CITATION_TAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)<citation>(.*?)</citation>").ok());
static CITE_MARKER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\[cite:\s*([^\]]+)\]").ok());

fn split_ids(list: &str) -> impl Iterator<Item = String> + '_ {
    list.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Citation ids used in `[cite:...]` markers, in order of appearance.
pub fn cited_ids(text: &str) -> Vec<String> {
    let Some(re) = CITE_MARKER.as_ref() else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    re.captures_iter(text)
        .filter_map(|c| c.get(1))
        .flat_map(|m| split_ids(m.as_str()).collect::<Vec<_>>())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

// ─────────────────────────────────────────────
// Outline
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OutlineSection {
    pub title: String,
    pub citations: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Outline {
    pub text: String,
    pub sections: Vec<OutlineSection>,
}

impl Outline {
    /// One section per non-empty line; `<citation>` groups hold its ids.
    pub fn parse(text: &str) -> Self {
        let sections = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|line| match CITATION_TAG.as_ref() {
                Some(re) => OutlineSection {
                    title: re.replace_all(line, "").trim().to_string(),
                    citations: re
                        .captures_iter(line)
                        .filter_map(|c| c.get(1))
                        .flat_map(|m| split_ids(m.as_str()).collect::<Vec<_>>())
                        .collect(),
                },
                None => OutlineSection {
                    title: line.to_string(),
                    citations: Vec::new(),
                },
            })
            .filter(|s| !s.title.is_empty())
            .collect();
        Self {
            text: text.trim().to_string(),
            sections,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn titles(&self) -> Vec<String> {
        self.sections.iter().map(|s| s.title.clone()).collect()
    }
}

// ─────────────────────────────────────────────
// Shared phase plumbing
// ─────────────────────────────────────────────

/// Settings common to both phases.
#[derive(Clone)]
struct PhaseSettings {
    provider: Arc<dyn LlmProvider>,
    model: String,
    request: LlmRequestConfig,
    protocol: ProtocolKind,
    max_rounds: u32,
    timeout: Duration,
    max_input_tokens: usize,
    max_report_chars: usize,
    instruction: String,
    events: EventSink,
}

impl PhaseSettings {
    async fn call(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<LlmResponse, ResearchError> {
        let tools = (self.protocol == ProtocolKind::Function && !tools.is_empty()).then_some(tools);
        call_until(
            self.provider.as_ref(),
            ModelCall {
                messages,
                tools,
                model: &self.model,
                request: &self.request,
            },
            deadline,
            self.timeout,
            cancel,
        )
        .await
    }

    fn emit_round(&self, phase: &str, round: u32, plan: &str, report: &str, action: &str) {
        self.events.emit(ResearchEvent::Round {
            phase: phase.to_string(),
            round,
            plan: plan.to_string(),
            report: report.to_string(),
            action: action.to_string(),
        });
    }
}

fn record(round: u32, plan: String, report: String, action: RoundAction, observations: Vec<Observation>) -> RoundRecord {
    RoundRecord {
        round,
        plan,
        report,
        action,
        observations,
        forced: false,
        timestamp: Utc::now(),
    }
}

/// Split a parsed action into its well-formed calls and one parse-error
/// observation per malformed call.
fn tool_calls_of(action: ParsedAction, round: u32) -> (Vec<ToolCall>, Vec<Observation>) {
    match action {
        ParsedAction::ToolCalls { calls, errors } => {
            let errors = errors
                .into_iter()
                .map(|e| {
                    warn!(round, error = %e, "malformed tool call");
                    Observation::error("parser", format!("Error: {}", ResearchError::Parse(e)), round)
                })
                .collect();
            (calls, errors)
        }
        _ => (Vec::new(), Vec::new()),
    }
}

/// Observation for a response that held nothing the phase can act on.
fn no_action(errors: Vec<Observation>, hint: &str, round: u32) -> (RoundAction, Vec<Observation>) {
    let observations = if errors.is_empty() {
        vec![Observation::error("parser", hint, round)]
    } else {
        errors
    };
    let message = observations
        .iter()
        .map(|o| o.content.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    (RoundAction::ParseError { message }, observations)
}

// ─────────────────────────────────────────────
// Planner
// ─────────────────────────────────────────────

pub struct PlannerOutcome {
    pub outline: Outline,
    pub trajectory: Vec<RoundRecord>,
}

pub struct Planner {
    settings: PhaseSettings,
    dispatcher: ToolDispatcher,
    bank: SharedMemoryBank,
    max_idle_rounds: u32,
}

impl Planner {
    const PHASE: &'static str = "planner";

    fn context(&self) -> ContextManager {
        let system = planner_system_prompt(&today_date(), &self.dispatcher.tool_names(), &self.settings.instruction);
        ContextManager::new(system, self.settings.max_input_tokens, self.settings.max_report_chars)
    }

    /// Check an outline against the bank. Returns the offending section titles.
    async fn ungrounded_sections(&self, outline: &Outline) -> Vec<String> {
        let bank = self.bank.read().await;
        outline
            .sections
            .iter()
            .filter(|s| !s.citations.iter().any(|id| bank.contains(id)))
            .map(|s| s.title.clone())
            .collect()
    }

    pub async fn run(&self, question: &str, cancel: &CancellationToken) -> PlannerOutcome {
        let deadline = Instant::now() + self.settings.timeout;
        let context = self.context();
        let tool_defs = self.dispatcher.get_definitions();
        let mut outline = Outline::default();
        let mut observation = String::new();
        let mut trajectory = Vec::new();
        let mut idle = 0u32;

        for round in 1..=self.settings.max_rounds {
            let last = round == self.settings.max_rounds;
            let mut sections = vec![
                Section::fixed("[Question]\n", question),
                Section::trimmable(
                    "[Current Outline]\n",
                    if outline.is_empty() { EMPTY_OUTLINE } else { outline.text.as_str() },
                    1,
                ),
                Section::trimmable(
                    "[Last Observation]\n",
                    if observation.is_empty() { NO_OBSERVATION } else { observation.as_str() },
                    0,
                ),
                Section::fixed("", LANGUAGE_NOTE),
            ];
            if last {
                sections.push(Section::fixed("[Final Instruction]\n", PLANNER_FINAL_INSTRUCTION));
            }

            let messages = match context.compose(sections, &[]) {
                Ok(m) => m,
                Err(e) => {
                    warn!(round, error = %e, "planner context does not fit");
                    break;
                }
            };
            let response = match self.settings.call(&messages, &tool_defs, deadline, cancel).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(round, error = %e, "planner phase stopped");
                    break;
                }
            };

            self.bank.write().await.set_round(round);
            let evidence_before = self.bank.read().await.size();
            let outline_before = outline.text.clone();

            let text = response.content_str();
            let plan = extract_tag(text, "plan").unwrap_or_default();
            let parsed = parse_response(&response, self.settings.protocol);
            let mut observations = Vec::new();
            let mut terminate = false;

            let action = if let Some(candidate) = extract_tag(text, "write_outline") {
                let candidate = Outline::parse(&candidate);
                let ungrounded = self.ungrounded_sections(&candidate).await;
                if candidate.is_empty() || !ungrounded.is_empty() {
                    let message = if candidate.is_empty() {
                        "Outline rejected: it has no sections.".to_string()
                    } else {
                        format!(
                            "Outline rejected: every section must cite at least one existing citation id. Sections without one: {}",
                            ungrounded.join("; ")
                        )
                    };
                    warn!(round, "outline rejected");
                    observations.push(Observation::error("write_outline", message, round));
                } else {
                    let removed: Vec<String> = outline
                        .titles()
                        .into_iter()
                        .filter(|t| !candidate.sections.iter().any(|s| &s.title == t))
                        .collect();
                    let mut message = format!("Outline successfully updated ({} sections).", candidate.sections.len());
                    if !removed.is_empty() {
                        message.push_str(&format!(" Removed sections: {}", removed.join("; ")));
                    }
                    info!(round, sections = candidate.sections.len(), "outline updated");
                    outline = candidate;
                    self.settings.events.emit(ResearchEvent::OutlineUpdated {
                        round,
                        outline: outline.text.clone(),
                    });
                    observations.push(Observation::ok("write_outline", message, round));
                }
                terminate = matches!(parsed.action, ParsedAction::Terminate(_));
                RoundAction::WriteOutline {
                    outline: outline.text.clone(),
                }
            } else if let ParsedAction::Terminate(reason) = &parsed.action {
                terminate = true;
                RoundAction::Terminate { reason: reason.clone() }
            } else {
                let (calls, errors) = tool_calls_of(parsed.action, round);
                if calls.is_empty() {
                    let (action, errors) = no_action(errors, PLANNER_NO_ACTION, round);
                    observations.extend(errors);
                    action
                } else {
                    observations.extend(errors);
                    let executed = self.dispatcher.execute_batch(&calls, round, cancel).await;
                    for obs in &executed {
                        self.settings
                            .events
                            .tool(Self::PHASE, round, &obs.source_tool, obs.is_error, &obs.content);
                    }
                    observations.extend(executed);
                    RoundAction::ToolCalls { calls }
                }
            };

            let action_name = match &action {
                RoundAction::ToolCalls { calls } => calls.iter().map(|c| c.tool_name.as_str()).collect::<Vec<_>>().join(","),
                RoundAction::WriteOutline { .. } => "write_outline".into(),
                RoundAction::Terminate { .. } => "terminate".into(),
                _ => "parse_error".into(),
            };
            self.settings.emit_round(Self::PHASE, round, &plan, &outline.text, &action_name);

            observation = render_observations(&observations);
            trajectory.push(record(round, plan, outline.text.clone(), action, observations));

            if terminate {
                info!(round, "planner terminated");
                break;
            }

            let evidence_after = self.bank.read().await.size();
            if evidence_after == evidence_before && outline.text == outline_before {
                idle += 1;
                if idle >= self.max_idle_rounds {
                    info!(round, idle, "planner idle, ending phase");
                    break;
                }
            } else {
                idle = 0;
            }
        }

        self.settings.events.emit(ResearchEvent::PhaseComplete {
            phase: Self::PHASE.into(),
            rounds: trajectory.len() as u32,
        });
        PlannerOutcome { outline, trajectory }
    }
}

// ─────────────────────────────────────────────
// Writer
// ─────────────────────────────────────────────

pub struct WriterOutcome {
    pub report: String,
    /// Outline sections that received a written section, in order.
    pub written: usize,
    pub trajectory: Vec<RoundRecord>,
}

pub struct Writer {
    settings: PhaseSettings,
    dispatcher: ToolDispatcher,
    bank: SharedMemoryBank,
    idle_write_hint: u32,
}

impl Writer {
    const PHASE: &'static str = "writer";

    fn context(&self) -> ContextManager {
        let system = writer_system_prompt(&today_date(), &self.settings.instruction);
        ContextManager::new(system, self.settings.max_input_tokens, self.settings.max_report_chars)
    }

    /// Why a section may not be accepted, if it may not.
    fn reject_reason(section: &str, retrieved: &HashSet<String>) -> Option<String> {
        if section.trim().is_empty() {
            return Some("Section rejected: it is empty.".into());
        }
        let cited = cited_ids(section);
        if cited.is_empty() {
            return Some("Section rejected: cite the retrieved evidence inline as [cite:id_N].".into());
        }
        let unknown: Vec<String> = cited.into_iter().filter(|id| !retrieved.contains(id)).collect();
        if !unknown.is_empty() {
            return Some(format!(
                "Section rejected: these ids were not retrieved in this phase: {}. Retrieve them first or cite only retrieved evidence.",
                unknown.join(", ")
            ));
        }
        None
    }

    pub async fn run(&self, question: &str, outline: &Outline, cancel: &CancellationToken) -> WriterOutcome {
        let deadline = Instant::now() + self.settings.timeout;
        let context = self.context();
        let tool_defs = self.dispatcher.get_definitions();
        let mut report = String::new();
        let mut written = 0usize;
        let mut observation = WRITER_FIRST_OBSERVATION.to_string();
        let mut retrieved: HashSet<String> = HashSet::new();
        let mut cache: HashMap<String, String> = HashMap::new();
        let mut since_write = 0u32;
        let mut trajectory = Vec::new();

        for round in 1..=self.settings.max_rounds {
            if written >= outline.sections.len() {
                break;
            }
            let last = round == self.settings.max_rounds;
            let mut sections = vec![
                Section::fixed("[Question]\n", question),
                Section::fixed("[Final Outline]\n", outline.text.as_str()),
                Section::trimmable("[Report Written So Far]\n", report.as_str(), 1),
                Section::trimmable("[Last Observation]\n", observation.as_str(), 0),
                Section::fixed("", LANGUAGE_NOTE),
            ];
            if last {
                sections.push(Section::fixed("[Final Instruction]\n", WRITER_FINAL_INSTRUCTION));
            }

            let messages = match context.compose(sections, &[]) {
                Ok(m) => m,
                Err(e) => {
                    warn!(round, error = %e, "writer context does not fit");
                    break;
                }
            };
            let response = match self.settings.call(&messages, &tool_defs, deadline, cancel).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(round, error = %e, "writer phase stopped");
                    break;
                }
            };

            let text = response.content_str();
            let plan = extract_tag(text, "plan").unwrap_or_default();
            let parsed = parse_response(&response, self.settings.protocol);
            let mut observations = Vec::new();
            let mut terminate = false;
            let mut wrote = false;

            let action = if let Some(section) = extract_tag(text, "write") {
                match Self::reject_reason(&section, &retrieved) {
                    Some(reason) => {
                        warn!(round, "section rejected");
                        observations.push(Observation::error("write", reason, round));
                    }
                    None => {
                        report.push_str("\n\n");
                        report.push_str(&section);
                        let title = outline.sections[written].title.clone();
                        written += 1;
                        wrote = true;
                        info!(round, section = written, total = outline.sections.len(), "section written");
                        self.settings.events.emit(ResearchEvent::SectionWritten {
                            round,
                            index: written,
                            section: title.clone(),
                        });
                        observations.push(Observation::ok(
                            "write",
                            format!("Section {written}/{} written: {title}.", outline.sections.len()),
                            round,
                        ));
                    }
                }
                terminate = has_tag(text, "terminate");
                RoundAction::WriteSection { section }
            } else if let ParsedAction::Terminate(reason) = &parsed.action {
                terminate = true;
                RoundAction::Terminate { reason: reason.clone() }
            } else {
                let (calls, errors) = tool_calls_of(parsed.action, round);
                if calls.is_empty() {
                    let (action, errors) = no_action(errors, WRITER_NO_ACTION, round);
                    observations.extend(errors);
                    action
                } else {
                    observations.extend(errors);
                    for call in &calls {
                        observations.push(self.retrieve(call, round, &mut retrieved, &mut cache, cancel).await);
                    }
                    RoundAction::ToolCalls { calls }
                }
            };

            if wrote {
                since_write = 0;
            } else {
                since_write += 1;
            }

            let action_name = match &action {
                RoundAction::ToolCalls { .. } => "retrieve",
                RoundAction::WriteSection { .. } => "write",
                RoundAction::Terminate { .. } => "terminate",
                _ => "parse_error",
            };
            self.settings.emit_round(Self::PHASE, round, &plan, "", action_name);

            observation = render_observations(&observations);
            if since_write >= self.idle_write_hint {
                observation.push_str(WRITE_NOW_HINT);
            }
            trajectory.push(record(round, plan, String::new(), action, observations));

            if terminate {
                info!(round, "writer terminated");
                break;
            }
        }

        self.settings.events.emit(ResearchEvent::PhaseComplete {
            phase: Self::PHASE.into(),
            rounds: trajectory.len() as u32,
        });
        WriterOutcome {
            report: report.trim().to_string(),
            written,
            trajectory,
        }
    }

    /// Dispatch one retrieve call, answering repeats from the cache.
    async fn retrieve(
        &self,
        call: &ToolCall,
        round: u32,
        retrieved: &mut HashSet<String>,
        cache: &mut HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Observation {
        let key = format!("{}:{}", call.tool_name, call.canonical_arguments());
        if let Some(cached) = cache.get(&key) {
            debug!(round, "retrieve answered from cache");
            return Observation::ok(
                call.tool_name.clone(),
                format!("Evidence already retrieved:\n\n{cached}\n\nYou MUST now proceed to <write> the section."),
                round,
            );
        }

        let obs = self.dispatcher.execute(call, round, cancel).await;
        self.settings
            .events
            .tool(Self::PHASE, round, &obs.source_tool, obs.is_error, &obs.content);
        if !obs.is_error && call.tool_name == "retrieve" {
            if let Ok(ids) = require_string_list(&call.arguments, "citation_ids") {
                let bank = self.bank.read().await;
                retrieved.extend(ids.into_iter().map(|id| id.trim().to_string()).filter(|id| bank.contains(id)));
            }
            cache.insert(key, obs.content.clone());
        }
        obs
    }
}

// ─────────────────────────────────────────────
// WebWeaverAgent
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize)]
pub struct WeaverResult {
    pub question: String,
    pub final_outline: Outline,
    pub final_report: String,
    pub memory_bank_size: usize,
    /// Outline sections left without a written section.
    pub unwritten_sections: Vec<String>,
    pub planner_trajectory: Vec<RoundRecord>,
    pub writer_trajectory: Vec<RoundRecord>,
    pub total_time_seconds: f64,
}

pub struct WebWeaverAgent {
    planner: Planner,
    writer: Writer,
    bank: SharedMemoryBank,
    events: EventSink,
}

impl WebWeaverAgent {
    /// `tools` are the planner's research tools; they are wrapped so their
    /// output lands in a fresh memory bank.
    pub fn new(provider: Arc<dyn LlmProvider>, tools: Vec<Arc<dyn Tool>>, config: &Config) -> Self {
        let bank = MemoryBank::shared();
        let mut request = LlmRequestConfig::from_config(&config.llm).with_temperature(config.weaver.temperature);
        if config.agent.protocol == ProtocolKind::Tagged {
            request = request.with_stop(&[OBS_START]);
        }
        let settings = PhaseSettings {
            model: if config.llm.model.is_empty() {
                provider.default_model().to_string()
            } else {
                config.llm.model.clone()
            },
            provider,
            request,
            protocol: config.agent.protocol,
            max_rounds: config.weaver.max_rounds.max(1),
            timeout: Duration::from_secs(config.weaver.phase_timeout_secs),
            max_input_tokens: config.agent.max_input_tokens,
            max_report_chars: config.agent.max_report_chars,
            instruction: config.agent.instruction.clone(),
            events: EventSink::none(),
        };
        let tool_timeout = Duration::from_secs(config.agent.tool_timeout_secs);

        let planner_tools = EvidenceTool::wrap_all(tools, &bank);
        let planner = Planner {
            settings: settings.clone(),
            dispatcher: ToolDispatcher::from_tools(planner_tools, &config.agent.tools, tool_timeout),
            bank: bank.clone(),
            max_idle_rounds: config.weaver.max_idle_rounds.max(1),
        };
        let writer = Writer {
            settings,
            dispatcher: ToolDispatcher::from_tools(
                vec![Arc::new(RetrieveTool::new(bank.clone())) as Arc<dyn Tool>],
                &[],
                tool_timeout,
            ),
            bank: bank.clone(),
            idle_write_hint: config.weaver.idle_write_hint.max(1),
        };

        Self {
            planner,
            writer,
            bank,
            events: EventSink::none(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.planner.settings.events = events.clone();
        self.writer.settings.events = events.clone();
        self.events = events;
        self
    }

    pub fn memory_bank(&self) -> SharedMemoryBank {
        self.bank.clone()
    }

    pub async fn run(&self, question: &str) -> WeaverResult {
        self.run_with_cancel(question, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(&self, question: &str, cancel: CancellationToken) -> WeaverResult {
        let started = Instant::now();
        self.events.status("planner phase started");
        let planned = self.planner.run(question, &cancel).await;

        let written = if planned.outline.is_empty() {
            warn!("planner produced no outline, skipping writer");
            WriterOutcome {
                report: String::new(),
                written: 0,
                trajectory: Vec::new(),
            }
        } else {
            self.events.status("writer phase started");
            self.writer.run(question, &planned.outline, &cancel).await
        };

        let unwritten_sections: Vec<String> = planned
            .outline
            .sections
            .iter()
            .skip(written.written)
            .map(|s| s.title.clone())
            .collect();
        if !unwritten_sections.is_empty() {
            warn!(unwritten = unwritten_sections.len(), "report is incomplete");
        }

        let memory_bank_size = self.bank.read().await.size();
        let total_time_seconds = started.elapsed().as_secs_f64();
        info!(
            sections = planned.outline.sections.len(),
            evidence = memory_bank_size,
            elapsed_secs = total_time_seconds,
            "webweaver run finished"
        );
        self.events.status("webweaver complete");

        WeaverResult {
            question: question.to_string(),
            final_outline: planned.outline,
            final_report: written.report,
            memory_bank_size,
            unwritten_sections,
            planner_trajectory: planned.trajectory,
            writer_trajectory: written.trajectory,
            total_time_seconds,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

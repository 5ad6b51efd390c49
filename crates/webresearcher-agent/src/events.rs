//! Progress events streamed to an optional observer (CLI `--events`, UIs).

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use webresearcher_core::utils::truncate_string;

use crate::research::Termination;

/// Tool output carried in events is cut to this many characters.
pub const EVENT_OBSERVATION_CHARS: usize = 1000;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResearchEvent {
    Round {
        phase: String,
        round: u32,
        plan: String,
        report: String,
        action: String,
    },
    Tool {
        phase: String,
        round: u32,
        tool: String,
        is_error: bool,
        observation: String,
    },
    OutlineUpdated {
        round: u32,
        outline: String,
    },
    SectionWritten {
        round: u32,
        index: usize,
        section: String,
    },
    PhaseComplete {
        phase: String,
        rounds: u32,
    },
    Final {
        prediction: String,
        termination: Termination,
    },
    Status {
        message: String,
    },
}

/// Cheap cloneable handle; a missing or closed receiver is ignored.
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<ResearchEvent>>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<ResearchEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: ResearchEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn tool(&self, phase: &str, round: u32, tool: &str, is_error: bool, observation: &str) {
        self.emit(ResearchEvent::Tool {
            phase: phase.to_string(),
            round,
            tool: tool.to_string(),
            is_error,
            observation: truncate_string(observation, EVENT_OBSERVATION_CHARS),
        });
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(ResearchEvent::Status {
            message: message.into(),
        });
    }
}

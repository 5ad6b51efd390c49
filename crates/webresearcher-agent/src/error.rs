//! Error taxonomy of the research controllers.
//!
//! Recoverable variants (`Parse`, `Tool`, `ToolTimeout`) are rendered into
//! observations and never leave a round. The remaining variants end the
//! round loop and decide the run's termination reason; the public run API
//! still returns an `AgentResult`, never one of these.

use thiserror::Error;
use webresearcher_providers::ProviderError;

#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("could not parse action: {0}")]
    Parse(String),

    #[error("tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    #[error("tool '{tool}' timed out after {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    #[error("round budget of {0} model calls exhausted")]
    RoundBudgetExhausted(u32),

    #[error("run exceeded its {0}s time budget")]
    RunTimeout(u64),

    #[error("conversation needs {tokens} tokens, over the {budget} token input budget")]
    HistoryTooLong { tokens: usize, budget: usize },

    #[error("{0} consecutive rounds failed")]
    TooManyFailures(u32),

    #[error("model client failed: {0}")]
    ModelClient(#[from] ProviderError),

    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Context(#[from] ContextError),
}

/// The parts of the prompt that may not be truncated do not fit.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("fixed prompt parts need {required} tokens but the budget is {budget}")]
pub struct ContextError {
    pub required: usize,
    pub budget: usize,
}

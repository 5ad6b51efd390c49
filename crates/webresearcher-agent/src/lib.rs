//! WebResearcher Agent: research controllers, tools, and the state they share.
//!
//! This crate contains:
//! - **research** / **protocol**: round data model and the action parser
//! - **context**: token-bounded prompt reconstruction from the workspace state
//! - **tools**: Tool trait, dispatcher, research tools, and the evidence wrappers
//! - **memory**: the citation-keyed evidence store
//! - **iter_research**: the single-agent IterResearch loop
//! - **react**: the multi-turn ReAct baseline that keeps the full history
//! - **webweaver**: planner/writer dual-agent research
//! - **tts**: parallel runs reduced to one answer

pub mod context;
pub mod error;
pub mod events;
pub mod iter_research;
pub mod memory;
pub mod prompts;
pub mod protocol;
pub mod react;
pub mod research;
pub mod tools;
pub mod tts;
pub mod webweaver;

#[cfg(test)]
mod testing;

pub use error::{ContextError, ResearchError};
pub use events::{EventSink, ResearchEvent};
pub use iter_research::ResearchAgent;
pub use memory::{MemoryBank, SharedMemoryBank};
pub use react::{ReactAgent, ReactResult};
pub use research::{AgentResult, RoundRecord, Termination};
pub use tools::{research_tools, Tool, ToolDispatcher};
pub use tts::{TtsAgent, TtsMethod, TtsResult};
pub use webweaver::{Outline, WeaverResult, WebWeaverAgent};

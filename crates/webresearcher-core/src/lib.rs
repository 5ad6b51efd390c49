//! Shared foundation for WebResearcher: LLM wire types, configuration, and
//! small utilities used by every other crate in the workspace.

pub mod config;
pub mod types;
pub mod utils;

//! Research tools and the dispatcher that runs them.

pub mod base;
pub mod dispatcher;
pub mod evidence;
pub mod files;
pub mod python;
pub mod web;

use std::sync::Arc;

use webresearcher_core::config::ToolsConfig;

pub use base::{optional_string, require_string_list, Tool};
pub use dispatcher::ToolDispatcher;
pub use evidence::{EvidenceTool, RetrieveTool};
pub use files::ParseFileTool;
pub use python::PythonTool;
pub use web::{ScholarTool, SearchTool, VisitTool};

/// The five built-in research tools, configured from `tools`.
pub fn research_tools(config: &ToolsConfig) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(SearchTool::new(config)),
        Arc::new(ScholarTool::new(config)),
        Arc::new(VisitTool::new(config)),
        Arc::new(PythonTool::new(config)),
        Arc::new(ParseFileTool::new(config)),
    ]
}

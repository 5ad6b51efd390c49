//! Memory-bank aware tools for the WebWeaver phases.
//!
//! [`EvidenceTool`] wraps a research tool for the planner: the wrapped
//! output goes into the memory bank and the model only sees citation ids
//! with short summaries. [`RetrieveTool`] is the writer's only way to read
//! that evidence back.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use webresearcher_core::utils::take_chars;

use super::base::{require_string_list, Tool};
use super::web::BLOCK_SEPARATOR;
use crate::memory::SharedMemoryBank;

const HIT_SUMMARY_CHARS: usize = 200;
const WHOLE_SUMMARY_CHARS: usize = 300;
/// Lines scanned after a hit header when collecting its snippet.
const SNIPPET_WINDOW: usize = 9;

/// How a wrapped tool's output is cut into evidence items.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvidenceSplit {
    /// One item per `N. [Title](URL)` hit.
    SearchHits,
    /// The whole output is one item.
    Whole,
}

impl EvidenceSplit {
    /// Search-style tools get per-hit splitting.
    pub fn for_tool(name: &str) -> Self {
        match name {
            "search" | "google_scholar" => EvidenceSplit::SearchHits,
            _ => EvidenceSplit::Whole,
        }
    }
}

fn summarize(prefix: &str, text: &str, max_chars: usize) -> String {
    let cut = take_chars(text, max_chars);
    if cut.len() < text.len() {
        format!("{prefix}{cut}...")
    } else {
        format!("{prefix}{cut}")
    }
}

/// A parsed search hit: title, url and the collected snippet text.
#[derive(Debug, PartialEq)]
struct Hit {
    title: String,
    url: String,
    snippet: String,
}

fn parse_hit_header(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    let (num, rest) = line.split_once(". [")?;
    if num.is_empty() || !num.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (title, rest) = rest.split_once("](")?;
    let url = rest.strip_suffix(')').unwrap_or(rest);
    Some((title.to_string(), url.to_string()))
}

fn split_hits(output: &str) -> Vec<Hit> {
    let mut hits = Vec::new();
    for block in output.split(BLOCK_SEPARATOR) {
        let lines: Vec<&str> = block.lines().collect();
        for (i, line) in lines.iter().enumerate() {
            let Some((title, url)) = parse_hit_header(line) else {
                continue;
            };
            let snippet = lines
                .iter()
                .skip(i + 1)
                .take(SNIPPET_WINDOW)
                .map(|l| l.trim())
                .take_while(|l| parse_hit_header(l).is_none())
                .filter(|l| !l.is_empty() && !l.starts_with("Date published:") && !l.starts_with("Source:"))
                .collect::<Vec<_>>()
                .join(" ");
            if !snippet.is_empty() {
                hits.push(Hit { title, url, snippet });
            }
        }
    }
    hits
}

// ─────────────────────────────────────────────
// EvidenceTool
// ─────────────────────────────────────────────

pub struct EvidenceTool {
    inner: Arc<dyn Tool>,
    bank: SharedMemoryBank,
    split: EvidenceSplit,
}

impl EvidenceTool {
    pub fn new(inner: Arc<dyn Tool>, bank: SharedMemoryBank) -> Self {
        let split = EvidenceSplit::for_tool(inner.name());
        Self { inner, bank, split }
    }

    /// Wrap every tool in `tools` around the same bank.
    pub fn wrap_all(tools: Vec<Arc<dyn Tool>>, bank: &SharedMemoryBank) -> Vec<Arc<dyn Tool>> {
        tools
            .into_iter()
            .map(|t| Arc::new(EvidenceTool::new(t, bank.clone())) as Arc<dyn Tool>)
            .collect()
    }
}

#[async_trait]
impl Tool for EvidenceTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters(&self) -> Value {
        self.inner.parameters()
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let output = self.inner.execute(params).await?;
        let name = self.inner.name();

        let mut bank = self.bank.write().await;
        let mut ids = Vec::new();
        if self.split == EvidenceSplit::SearchHits {
            for hit in split_hits(&output) {
                let summary = summarize(&format!("[{}] ", hit.title), &hit.snippet, HIT_SUMMARY_CHARS);
                let content = format!("Title: {}\nURL: {}\nSnippet: {}", hit.title, hit.url, hit.snippet);
                ids.push(bank.add_evidence(content, summary));
            }
        }
        if ids.is_empty() {
            let summary = if self.split == EvidenceSplit::SearchHits {
                summarize("", &output, WHOLE_SUMMARY_CHARS)
            } else {
                summarize(&format!("{name} result: "), &output, HIT_SUMMARY_CHARS)
            };
            ids.push(bank.add_evidence(output, summary));
        }

        debug!(tool = name, added = ids.len(), total = bank.size(), "evidence stored");
        Ok(ids
            .iter()
            .map(|id| bank.render_added(id))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

// ─────────────────────────────────────────────
// RetrieveTool
// ─────────────────────────────────────────────

pub struct RetrieveTool {
    bank: SharedMemoryBank,
}

impl RetrieveTool {
    pub fn new(bank: SharedMemoryBank) -> Self {
        Self { bank }
    }
}

#[async_trait]
impl Tool for RetrieveTool {
    fn name(&self) -> &str {
        "retrieve"
    }

    fn description(&self) -> &str {
        "Retrieve the full text of evidence from the memory bank by citation id."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "citation_ids": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Citation ids to retrieve, e.g. [\"id_1\", \"id_4\"]."
                }
            },
            "required": ["citation_ids"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let ids = require_string_list(&params, "citation_ids")?;
        let bank = self.bank.read().await;
        Ok(bank.retrieve(&ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBank;

    struct FixedTool {
        name: &'static str,
        output: String,
    }

    #[async_trait]
    impl Tool for FixedTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "fixed"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _params: HashMap<String, Value>) -> anyhow::Result<String> {
            Ok(self.output.clone())
        }
    }

    const SEARCH_OUTPUT: &str = "A Google search for 'springfield' found 2 results:\n\n## Web Results\n\
1. [Springfield - Wikipedia](https://en.wikipedia.org/wiki/Springfield)\nDate published: 2021\nSource: Wikipedia\n\nPopulation was 30,720 in 2020.\n\n\
2. [City data](https://city.example/springfield)\n\nMedian age 38.";

    fn wrapped(name: &'static str, output: &str) -> (EvidenceTool, SharedMemoryBank) {
        let bank = MemoryBank::shared();
        let tool = EvidenceTool::new(
            Arc::new(FixedTool {
                name,
                output: output.to_string(),
            }),
            bank.clone(),
        );
        (tool, bank)
    }

    #[test]
    fn test_parse_hit_header() {
        assert_eq!(
            parse_hit_header("12. [A title](https://x.y/z)"),
            Some(("A title".into(), "https://x.y/z".into()))
        );
        assert_eq!(parse_hit_header("Date published: 2020"), None);
        assert_eq!(parse_hit_header("x. [a](b)"), None);
    }

    #[tokio::test]
    async fn test_search_output_split_per_hit() {
        let (tool, bank) = wrapped("search", SEARCH_OUTPUT);
        let obs = tool.execute(HashMap::new()).await.unwrap();
        assert!(obs.contains("<citation>id_1</citation>: [Springfield - Wikipedia] Population was 30,720 in 2020."));
        assert!(obs.contains("<citation>id_2</citation>: [City data] Median age 38."));

        let bank = bank.read().await;
        assert_eq!(bank.size(), 2);
        let first = bank.get_evidence("id_1").unwrap();
        assert_eq!(
            first.content,
            "Title: Springfield - Wikipedia\nURL: https://en.wikipedia.org/wiki/Springfield\nSnippet: Population was 30,720 in 2020."
        );
    }

    #[tokio::test]
    async fn test_unparseable_search_becomes_one_item() {
        let long = "no hits here ".repeat(40);
        let (tool, bank) = wrapped("search", &long);
        let obs = tool.execute(HashMap::new()).await.unwrap();
        assert!(obs.ends_with("..."));
        assert_eq!(bank.read().await.size(), 1);
    }

    #[tokio::test]
    async fn test_other_tools_store_whole_output() {
        let (tool, bank) = wrapped("python", "stdout:\n42");
        let obs = tool.execute(HashMap::new()).await.unwrap();
        assert_eq!(obs, "Evidence saved as <citation>id_1</citation>: python result: stdout:\n42");
        assert_eq!(bank.read().await.get_evidence("id_1").unwrap().content, "stdout:\n42");
    }

    #[tokio::test]
    async fn test_failed_search_stores_no_evidence() {
        use crate::tools::web::SearchTool;
        use webresearcher_core::config::ToolsConfig;
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;
        let config = ToolsConfig {
            serper_api_key: "k".into(),
            serper_base_url: server.uri(),
            ..Default::default()
        };

        let bank = MemoryBank::shared();
        let tool = EvidenceTool::new(Arc::new(SearchTool::new(&config)), bank.clone());
        let mut params = HashMap::new();
        params.insert("query".to_string(), json!(["a", "b"]));
        assert!(tool.execute(params).await.is_err());
        assert_eq!(bank.read().await.size(), 0);
    }

    #[tokio::test]
    async fn test_retrieve_tool() {
        let bank = MemoryBank::shared();
        bank.write().await.add_evidence("Population 30,720", "pop");
        let tool = RetrieveTool::new(bank);
        let mut params = HashMap::new();
        params.insert("citation_ids".to_string(), json!(["id_1", "id_3"]));
        let out = tool.execute(params).await.unwrap();
        assert!(out.contains("<evidence id='id_1'>\nPopulation 30,720\n</evidence>"));
        assert!(out.contains("'id_3' not found"));
    }
}

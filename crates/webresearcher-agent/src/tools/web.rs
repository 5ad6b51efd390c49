//! Web tools: Serper web search, Serper scholar search, and page visits
//! (Jina reader or direct HTTP with HTML-to-text extraction).

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use webresearcher_core::config::ToolsConfig;
use webresearcher_core::utils::take_chars;

use super::base::{optional_string, require_string_list, Tool};

/// User-Agent header.
const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_7_2) AppleWebKit/537.36 (KHTML, like Gecko)";

/// Queries accepted per call.
pub const MAX_QUERIES: usize = 5;

/// Separator between per-query (or per-URL) result blocks.
pub const BLOCK_SEPARATOR: &str = "\n=======\n";

fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| ('\u{4E00}'..='\u{9FFF}').contains(&c))
}

fn clean_snippet(s: &str) -> String {
    s.replace("Your browser can't play this video.", "").trim().to_string()
}

// ─────────────────────────────────────────────
// Serper client (shared by search + scholar)
// ─────────────────────────────────────────────

#[derive(Clone)]
struct Serper {
    client: Client,
    api_key: String,
    base_url: String,
    num_results: usize,
}

impl Serper {
    fn from_config(config: &ToolsConfig) -> Self {
        Self {
            client: build_client(Duration::from_secs(30)),
            api_key: config.serper_api_key.clone(),
            base_url: config.serper_base_url.trim_end_matches('/').to_string(),
            num_results: config.search_results.clamp(1, 100),
        }
    }

    fn ensure_key(&self) -> anyhow::Result<()> {
        if self.api_key.is_empty() {
            anyhow::bail!("No Serper API key configured (set SERPER_API_KEY or tools.serperApiKey)");
        }
        Ok(())
    }

    async fn query(&self, endpoint: &str, payload: Value) -> anyhow::Result<Vec<Value>> {
        let resp = self
            .client
            .post(format!("{}/{}", self.base_url, endpoint))
            .header("X-API-KEY", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Serper request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Serper returned {status}: {body}");
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse Serper response: {e}"))?;

        Ok(body["organic"].as_array().cloned().unwrap_or_default())
    }
}

/// Run each query and join the formatted blocks. A failed query is
/// reported inline next to the others; the call fails only when every
/// query did.
async fn run_queries<F, Fut>(queries: Vec<String>, run: F) -> anyhow::Result<String>
where
    F: Fn(String) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<String>>,
{
    let mut queries = queries;
    if queries.len() > MAX_QUERIES {
        warn!(requested = queries.len(), "Too many queries, keeping the first {MAX_QUERIES}");
        queries.truncate(MAX_QUERIES);
    }

    let results = futures::future::join_all(queries.iter().map(|q| run(q.clone()))).await;
    let failed = results.iter().filter(|r| r.is_err()).count();
    let blocks: Vec<String> = queries
        .iter()
        .zip(results)
        .map(|(q, result)| match result {
            Ok(block) => block,
            Err(e) => format!("Search for '{q}' failed: {e}"),
        })
        .collect();

    if failed == blocks.len() {
        anyhow::bail!("{}", blocks.join("; "));
    }
    Ok(blocks.join(BLOCK_SEPARATOR))
}

// ─────────────────────────────────────────────
// SearchTool
// ─────────────────────────────────────────────

/// Batched Google web search through Serper.
pub struct SearchTool {
    serper: Serper,
}

impl SearchTool {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            serper: Serper::from_config(config),
        }
    }

    async fn search_one(serper: Serper, query: String) -> anyhow::Result<String> {
        let payload = if contains_cjk(&query) {
            json!({"q": query, "location": "China", "gl": "cn", "hl": "zh-cn", "num": serper.num_results})
        } else {
            json!({"q": query, "location": "United States", "gl": "us", "hl": "en", "num": serper.num_results})
        };

        debug!(query = %query, "searching web");
        let pages = serper.query("search", payload).await?;
        if pages.is_empty() {
            return Ok(format!(
                "No results found for '{query}'. Try with a more general query."
            ));
        }

        let snippets: Vec<String> = pages
            .iter()
            .enumerate()
            .map(|(i, page)| {
                let mut entry = format!(
                    "{}. [{}]({})",
                    i + 1,
                    page["title"].as_str().unwrap_or("(no title)"),
                    page["link"].as_str().unwrap_or("")
                );
                if let Some(date) = page["date"].as_str() {
                    entry.push_str(&format!("\nDate published: {date}"));
                }
                if let Some(source) = page["source"].as_str() {
                    entry.push_str(&format!("\nSource: {source}"));
                }
                entry.push('\n');
                if let Some(snippet) = page["snippet"].as_str() {
                    entry.push('\n');
                    entry.push_str(&clean_snippet(snippet));
                }
                entry
            })
            .collect();

        Ok(format!(
            "A Google search for '{query}' found {} results:\n\n## Web Results\n{}",
            snippets.len(),
            snippets.join("\n\n")
        ))
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Performs batched web searches: supply an array 'query'; the tool retrieves the top results for each query in one call. Max 5 queries."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Array of query strings. Include multiple complementary queries in a single call. Max 5 queries."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let queries = require_string_list(&params, "query")?;
        self.serper.ensure_key()?;
        let serper = self.serper.clone();
        run_queries(queries, |q| Self::search_one(serper.clone(), q)).await
    }
}

// ─────────────────────────────────────────────
// ScholarTool
// ─────────────────────────────────────────────

/// Google Scholar search through Serper.
pub struct ScholarTool {
    serper: Serper,
}

impl ScholarTool {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            serper: Serper::from_config(config),
        }
    }

    async fn search_one(serper: Serper, query: String) -> anyhow::Result<String> {
        debug!(query = %query, "searching scholar");
        let pages = serper.query("scholar", json!({ "q": query })).await?;
        if pages.is_empty() {
            return Ok(format!(
                "No results found for '{query}'. Try using a more general query."
            ));
        }

        let entries: Vec<String> = pages
            .iter()
            .enumerate()
            .map(|(i, page)| {
                let link = page["pdfUrl"]
                    .as_str()
                    .or_else(|| page["link"].as_str())
                    .unwrap_or("no available link");
                let mut lines = vec![format!(
                    "{}. [{}]({})",
                    i + 1,
                    page["title"].as_str().unwrap_or("No title"),
                    link
                )];
                if let Some(info) = page["publicationInfo"].as_str() {
                    lines.push(format!("Publication: {info}"));
                }
                match &page["year"] {
                    Value::Number(n) => lines.push(format!("Year: {n}")),
                    Value::String(s) if !s.is_empty() => lines.push(format!("Year: {s}")),
                    _ => {}
                }
                if let Some(cited) = page["citedBy"].as_u64() {
                    lines.push(format!("Cited by: {cited}"));
                }
                if let Some(snippet) = page["snippet"].as_str() {
                    let snippet = clean_snippet(snippet);
                    if !snippet.is_empty() {
                        lines.push(snippet);
                    }
                }
                lines.join("\n")
            })
            .collect();

        Ok(format!(
            "A Google Scholar search for '{query}' found {} results:\n\n## Scholar Results\n{}",
            entries.len(),
            entries.join("\n\n")
        ))
    }
}

#[async_trait]
impl Tool for ScholarTool {
    fn name(&self) -> &str {
        "google_scholar"
    }

    fn description(&self) -> &str {
        "Leverage Google Scholar to retrieve relevant information from academic publications. Accepts multiple queries. Max 5 queries."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 1,
                    "description": "The list of search queries for Google Scholar. Max 5 queries."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let queries = require_string_list(&params, "query")?;
        self.serper.ensure_key()?;
        let serper = self.serper.clone();
        run_queries(queries, |q| Self::search_one(serper.clone(), q)).await
    }
}

// ─────────────────────────────────────────────
// VisitTool
// ─────────────────────────────────────────────

/// Fetches web pages and returns their readable text.
pub struct VisitTool {
    client: Client,
    jina_api_key: String,
    jina_base_url: String,
    max_chars: usize,
}

impl VisitTool {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            client: build_client(Duration::from_secs(50)),
            jina_api_key: config.jina_api_key.clone(),
            jina_base_url: config.jina_base_url.trim_end_matches('/').to_string(),
            max_chars: config.visit_max_chars.max(100),
        }
    }

    async fn read_page(&self, url: &str) -> anyhow::Result<String> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("Invalid URL: must start with http:// or https://");
        }

        let text = if self.jina_api_key.is_empty() {
            self.fetch_direct(url).await?
        } else {
            self.fetch_jina(url).await?
        };

        if text.trim().is_empty() {
            anyhow::bail!("The page returned no readable content");
        }
        Ok(take_chars(&text, self.max_chars).to_string())
    }

    async fn fetch_jina(&self, url: &str) -> anyhow::Result<String> {
        debug!(url = %url, "reading page via jina");
        let resp = self
            .client
            .get(format!("{}/{}", self.jina_base_url, url))
            .bearer_auth(&self.jina_api_key)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Jina request failed: {e}"))?;
        if !resp.status().is_success() {
            anyhow::bail!("Jina reader returned {}", resp.status());
        }
        resp.text()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read response body: {e}"))
    }

    async fn fetch_direct(&self, url: &str) -> anyhow::Result<String> {
        debug!(url = %url, "fetching web page");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP request failed: {e}"))?;

        if !resp.status().is_success() {
            anyhow::bail!("HTTP {} for {url}", resp.status());
        }
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = resp
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read response body: {e}"))?;

        Ok(if content_type.contains("html") || body.trim_start().starts_with('<') {
            html_to_text(&body)
        } else {
            body
        })
    }
}

#[async_trait]
impl Tool for VisitTool {
    fn name(&self) -> &str {
        "visit"
    }

    fn description(&self) -> &str {
        "Visit webpage(s) and return their readable content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": ["string", "array"],
                    "items": { "type": "string" },
                    "minItems": 1,
                    "description": "The URL(s) of the webpage(s) to visit."
                },
                "goal": {
                    "type": "string",
                    "description": "The specific information goal for visiting the webpage(s)."
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let urls = require_string_list(&params, "url")?;
        let goal = optional_string(&params, "goal");

        let pages = futures::future::join_all(urls.iter().map(|u| self.read_page(u))).await;
        let failed = pages.iter().filter(|p| p.is_err()).count();

        let blocks: Vec<String> = urls
            .iter()
            .zip(pages)
            .map(|(url, page)| {
                let header = match &goal {
                    Some(goal) => format!("Content of {url} (goal: {goal}):"),
                    None => format!("Content of {url}:"),
                };
                match page {
                    Ok(text) => format!("{header}\n{text}"),
                    Err(e) => {
                        warn!(url = %url, error = %e, "visit failed");
                        format!("{header}\n[visit] Failed to read page: {e}")
                    }
                }
            })
            .collect();

        if failed == blocks.len() {
            anyhow::bail!("{}", blocks.join("; "));
        }
        Ok(blocks.join(BLOCK_SEPARATOR))
    }
}

// ─────────────────────────────────────────────
// HTML helpers
// ─────────────────────────────────────────────

static INVISIBLE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>|<!--.*?-->",
    )
    .ok()
});
static BLOCK_TAG: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*(br|/p|p|/div|div|/li|li|/h[1-6]|h[1-6]|/tr|tr|/section|/article)\b[^>]*>").ok()
});
static ANY_TAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").ok());
static SPACES: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[ \t\r\f\v]+").ok());
static LINE_BREAKS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s*\n\s*").ok());

fn replace_all(re: &LazyLock<Option<Regex>>, text: &str, rep: &str) -> String {
    match re.as_ref() {
        Some(re) => re.replace_all(text, rep).into_owned(),
        None => text.to_string(),
    }
}

/// Reduce an HTML document to readable text: drop scripts, styles and
/// comments, turn block-level tags into line breaks, decode the common
/// entities, and collapse whitespace.
pub fn html_to_text(html: &str) -> String {
    let text = replace_all(&INVISIBLE, html, "");
    let text = replace_all(&BLOCK_TAG, &text, "\n");
    let text = replace_all(&ANY_TAG, &text, "");

    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    let text = replace_all(&SPACES, &text, " ");
    let text = replace_all(&LINE_BREAKS, &text, "\n");
    text.trim().to_string()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

//! Python tool: runs code on a SandboxFusion endpoint, or in a local
//! interpreter subprocess when no sandbox is configured.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{debug, info, warn};

use webresearcher_core::config::ToolsConfig;

use super::base::{optional_string, Tool};

/// Max characters of combined output returned to the model.
const MAX_OUTPUT_LEN: usize = 20_000;

/// Sandbox attempts per call (endpoints are rotated between attempts).
const SANDBOX_ATTEMPTS: usize = 2;

const DEFAULT_RUN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct RunCodeResponse {
    #[serde(default)]
    run_result: Option<RunResult>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RunResult {
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
    #[serde(default)]
    execution_time: Option<f64>,
}

/// Executes Python snippets and reports stdout/stderr.
pub struct PythonTool {
    client: Client,
    endpoints: Vec<String>,
    interpreter: String,
    run_timeout: Duration,
}

impl PythonTool {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS + 10))
                .build()
                .unwrap_or_default(),
            endpoints: config
                .sandbox_endpoints
                .iter()
                .map(|e| e.trim_end_matches('/').to_string())
                .collect(),
            interpreter: "python3".to_string(),
            run_timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
        }
    }

    /// Override the local interpreter binary.
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    async fn run_in_sandbox(&self, code: &str) -> anyhow::Result<String> {
        let mut last_error = None;
        for attempt in 0..SANDBOX_ATTEMPTS {
            let endpoint = &self.endpoints[attempt % self.endpoints.len()];
            debug!(endpoint = %endpoint, attempt = attempt + 1, "running code in sandbox");

            match self.call_sandbox(endpoint, code).await {
                Ok(output) => return Ok(output),
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "sandbox call failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no sandbox endpoint available")))
    }

    async fn call_sandbox(&self, endpoint: &str, code: &str) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(format!("{endpoint}/run_code"))
            .json(&json!({
                "code": code,
                "language": "python",
                "run_timeout": self.run_timeout.as_secs(),
            }))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Sandbox request failed: {e}"))?;

        if !resp.status().is_success() {
            anyhow::bail!("Sandbox returned {}", resp.status());
        }

        let body: RunCodeResponse = resp
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse sandbox response: {e}"))?;

        let Some(run) = body.run_result else {
            anyhow::bail!(
                "Sandbox did not run the code: {}",
                body.message.unwrap_or_else(|| "no run result".to_string())
            );
        };

        let mut output = format_output(
            run.stdout.as_deref().unwrap_or(""),
            run.stderr.as_deref().unwrap_or(""),
        );
        let limit = self.run_timeout.as_secs_f64();
        if run.execution_time.is_some_and(|t| t >= limit - 1.0) {
            output.push_str("\n[Python Interpreter Error] TimeoutError: Execution timed out.");
        }
        Ok(output)
    }

    async fn run_locally(&self, code: &str) -> anyhow::Result<String> {
        debug!(interpreter = %self.interpreter, "running code locally");

        let child = Command::new(&self.interpreter)
            .arg("-c")
            .arg(code)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to start {}: {e}", self.interpreter))?;

        match tokio::time::timeout(self.run_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(format_output(
                &String::from_utf8_lossy(&output.stdout),
                &String::from_utf8_lossy(&output.stderr),
            )),
            Ok(Err(e)) => anyhow::bail!("Execution failed: {e}"),
            Err(_) => anyhow::bail!(
                "TimeoutError: Execution timed out after {} seconds",
                self.run_timeout.as_secs()
            ),
        }
    }
}

/// `stdout:\n…` / `stderr:\n…`, or "Finished execution." when both are empty.
fn format_output(stdout: &str, stderr: &str) -> String {
    let mut parts = Vec::new();
    if !stdout.trim().is_empty() {
        parts.push(format!("stdout:\n{stdout}"));
    }
    if !stderr.trim().is_empty() {
        parts.push(format!("stderr:\n{stderr}"));
    }
    if parts.is_empty() {
        return "Finished execution.".to_string();
    }

    let mut combined = parts.join("\n");
    if combined.len() > MAX_OUTPUT_LEN {
        let mut cut = MAX_OUTPUT_LEN;
        while !combined.is_char_boundary(cut) {
            cut -= 1;
        }
        let remaining = combined.len() - cut;
        combined.truncate(cut);
        combined.push_str(&format!("\n... (truncated, {remaining} more bytes)"));
    }
    combined
}

/// Unwrap a fenced code block if the model sent one.
fn extract_code(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        // Skip the language tag line.
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(after.len());
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].to_string();
        }
    }
    trimmed.to_string()
}

#[async_trait]
impl Tool for PythonTool {
    fn name(&self) -> &str {
        "python"
    }

    fn description(&self) -> &str {
        "Execute Python code in a sandboxed environment and return the execution results. \
         Make sure to use print() for any output you want to see."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The Python code to execute. Use print() statements for any output you want to see."
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let raw = optional_string(&params, "code")
            .or_else(|| optional_string(&params, "raw"))
            .unwrap_or_default();
        let code = extract_code(&raw);
        if code.trim().is_empty() {
            anyhow::bail!("Empty code");
        }

        if self.endpoints.is_empty() {
            info!("No sandbox endpoints configured, running code locally");
            self.run_locally(&code).await
        } else {
            self.run_in_sandbox(&code).await
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn code_params(code: &str) -> HashMap<String, Value> {
        let mut p = HashMap::new();
        p.insert("code".into(), json!(code));
        p
    }

    #[test]
    fn test_format_output() {
        assert_eq!(format_output("", "  "), "Finished execution.");
        assert_eq!(format_output("42\n", ""), "stdout:\n42\n");
        assert_eq!(format_output("a", "b"), "stdout:\na\nstderr:\nb");
    }

    #[test]
    fn test_format_output_truncates() {
        let out = format_output(&"x".repeat(MAX_OUTPUT_LEN * 2), "");
        assert!(out.contains("(truncated,"));
        assert!(out.len() < MAX_OUTPUT_LEN + 100);
    }

    #[test]
    fn test_extract_code_from_fence() {
        assert_eq!(extract_code("```python\nprint(1)\n```"), "print(1)\n");
        assert_eq!(extract_code("print(2)"), "print(2)");
    }

    #[tokio::test]
    async fn test_empty_code_is_error() {
        let tool = PythonTool::new(&ToolsConfig::default());
        assert!(tool.execute(code_params("   ")).await.is_err());
        assert!(tool.execute(HashMap::new()).await.is_err());
    }

    // ── sandbox ──

    #[tokio::test]
    async fn test_sandbox_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/run_code"))
            .and(body_partial_json(json!({"language": "python", "code": "print(6*7)"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "Success",
                "run_result": { "stdout": "42\n", "stderr": "", "execution_time": 0.05 }
            })))
            .mount(&server)
            .await;

        let config = ToolsConfig {
            sandbox_endpoints: vec![server.uri()],
            ..Default::default()
        };
        let tool = PythonTool::new(&config);
        let out = tool.execute(code_params("print(6*7)")).await.unwrap();
        assert_eq!(out, "stdout:\n42\n");
    }

    #[tokio::test]
    async fn test_sandbox_falls_over_to_second_endpoint() {
        let bad = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&bad)
            .await;
        let good = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/run_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "run_result": { "stdout": "", "stderr": "NameError: x", "execution_time": 0.01 }
            })))
            .mount(&good)
            .await;

        let config = ToolsConfig {
            sandbox_endpoints: vec![bad.uri(), good.uri()],
            ..Default::default()
        };
        let out = PythonTool::new(&config)
            .execute(code_params("print(x)"))
            .await
            .unwrap();
        assert_eq!(out, "stderr:\nNameError: x");
    }

    #[tokio::test]
    async fn test_sandbox_all_attempts_fail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let config = ToolsConfig {
            sandbox_endpoints: vec![server.uri()],
            ..Default::default()
        };
        let err = PythonTool::new(&config)
            .execute(code_params("print(1)"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_sandbox_reports_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "run_result": { "stdout": "partial", "execution_time": 30.0 }
            })))
            .mount(&server)
            .await;

        let config = ToolsConfig {
            sandbox_endpoints: vec![server.uri()],
            ..Default::default()
        };
        let out = PythonTool::new(&config)
            .execute(code_params("while True: pass"))
            .await
            .unwrap();
        assert!(out.starts_with("stdout:\npartial"));
        assert!(out.contains("TimeoutError"));
    }

    // ── local fallback (driven through `sh -c` so the test needs no Python) ──

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_execution() {
        let tool = PythonTool::new(&ToolsConfig::default()).with_interpreter("sh");
        let out = tool.execute(code_params("echo hello")).await.unwrap();
        assert_eq!(out, "stdout:\nhello\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_silent_code() {
        let tool = PythonTool::new(&ToolsConfig::default()).with_interpreter("sh");
        let out = tool.execute(code_params("true")).await.unwrap();
        assert_eq!(out, "Finished execution.");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_timeout_is_error() {
        let tool = PythonTool::new(&ToolsConfig::default())
            .with_interpreter("sh")
            .with_run_timeout(Duration::from_millis(200));
        let err = tool.execute(code_params("sleep 5")).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_local_missing_interpreter() {
        let tool = PythonTool::new(&ToolsConfig::default())
            .with_interpreter("definitely-not-an-interpreter-xyz");
        let err = tool.execute(code_params("print(1)")).await.unwrap_err();
        assert!(err.to_string().contains("Failed to start"));
    }
}

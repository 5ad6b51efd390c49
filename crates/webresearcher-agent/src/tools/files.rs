//! `parse_file`: reads text files from the configured file directory.
//!
//! Paths are resolved relative to `tools.fileDir` and may not escape it.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use webresearcher_core::config::ToolsConfig;
use webresearcher_core::utils::{expand_home, take_chars};

use super::base::{require_string_list, Tool};

/// Characters returned per file.
const MAX_FILE_CHARS: usize = 100_000;

// ─────────────────────────────────────────────
// Path helper
// ─────────────────────────────────────────────

/// Resolve `name` inside `root`, refusing anything that lands outside it.
///
/// Absolute paths and `..` components are rejected lexically first so a
/// missing file still yields a clear error; existing files are then
/// canonicalized to catch symlinks pointing elsewhere.
fn resolve_in_root(root: &Path, name: &str) -> anyhow::Result<PathBuf> {
    let rel = Path::new(name.trim());
    if rel.is_absolute()
        || rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_) | Component::RootDir))
    {
        anyhow::bail!("Access denied: '{name}' is outside the file directory");
    }

    let candidate = root.join(rel);
    if !candidate.exists() {
        anyhow::bail!("File not found: {name}");
    }

    let root_canon = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let resolved = candidate.canonicalize().unwrap_or(candidate);
    if !resolved.starts_with(&root_canon) {
        anyhow::bail!("Access denied: '{name}' is outside the file directory");
    }
    Ok(resolved)
}

// ─────────────────────────────────────────────
// ParseFileTool
// ─────────────────────────────────────────────

pub struct ParseFileTool {
    root: PathBuf,
}

impl ParseFileTool {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            root: expand_home(&config.file_dir),
        }
    }

    async fn read_one(&self, name: &str) -> anyhow::Result<String> {
        let path = resolve_in_root(&self.root, name)?;
        if path.is_dir() {
            anyhow::bail!("'{name}' is a directory");
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {name}: {e}"))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| anyhow::anyhow!("'{name}' is not a UTF-8 text file"))?;

        let total = text.chars().count();
        let mut content = take_chars(&text, MAX_FILE_CHARS).to_string();
        if total > MAX_FILE_CHARS {
            content.push_str(&format!("\n... (truncated, {} more chars)", total - MAX_FILE_CHARS));
        }
        Ok(content)
    }
}

#[async_trait]
impl Tool for ParseFileTool {
    fn name(&self) -> &str {
        "parse_file"
    }

    fn description(&self) -> &str {
        "Parse user-provided files and return their text content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "files": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "File names to parse, relative to the file directory."
                }
            },
            "required": ["files"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let files = require_string_list(&params, "files")?;
        debug!(files = ?files, root = %self.root.display(), "parsing files");

        let mut blocks = Vec::with_capacity(files.len());
        let mut failures = 0;
        for name in &files {
            match self.read_one(name).await {
                Ok(content) => blocks.push(format!("# File: {name}\n{content}")),
                Err(e) => {
                    failures += 1;
                    blocks.push(format!("# File: {name}\n[parse_file] {e}"));
                }
            }
        }

        if failures == files.len() {
            anyhow::bail!("{}", blocks.join("\n\n"));
        }
        Ok(blocks.join("\n\n"))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ParseFileTool) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "The answer is 42.").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("data.csv"), "a,b\n1,2\n").unwrap();
        let config = ToolsConfig {
            file_dir: dir.path().to_string_lossy().to_string(),
            ..Default::default()
        };
        let tool = ParseFileTool::new(&config);
        (dir, tool)
    }

    fn files(value: Value) -> HashMap<String, Value> {
        let mut p = HashMap::new();
        p.insert("files".into(), value);
        p
    }

    #[tokio::test]
    async fn test_reads_files() {
        let (_dir, tool) = setup();
        let out = tool
            .execute(files(json!(["notes.txt", "sub/data.csv"])))
            .await
            .unwrap();
        assert!(out.contains("# File: notes.txt\nThe answer is 42."));
        assert!(out.contains("# File: sub/data.csv\na,b"));
    }

    #[tokio::test]
    async fn test_single_string_accepted() {
        let (_dir, tool) = setup();
        let out = tool.execute(files(json!("notes.txt"))).await.unwrap();
        assert!(out.contains("42"));
    }

    #[tokio::test]
    async fn test_traversal_refused() {
        let (_dir, tool) = setup();
        let err = tool
            .execute(files(json!(["../../etc/passwd"])))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Access denied"));

        let err = tool.execute(files(json!(["/etc/passwd"]))).await.unwrap_err();
        assert!(err.to_string().contains("Access denied"));
    }

    #[tokio::test]
    async fn test_partial_failure_reported_inline() {
        let (_dir, tool) = setup();
        let out = tool
            .execute(files(json!(["notes.txt", "missing.pdf"])))
            .await
            .unwrap();
        assert!(out.contains("The answer is 42."));
        assert!(out.contains("File not found: missing.pdf"));
    }

    #[tokio::test]
    async fn test_binary_rejected() {
        let (dir, tool) = setup();
        std::fs::write(dir.path().join("blob.bin"), [0xff, 0xfe, 0x00, 0x80]).unwrap();
        let err = tool.execute(files(json!(["blob.bin"]))).await.unwrap_err();
        assert!(err.to_string().contains("not a UTF-8 text file"));
    }

    #[tokio::test]
    async fn test_directory_rejected() {
        let (_dir, tool) = setup();
        let err = tool.execute(files(json!(["sub"]))).await.unwrap_err();
        assert!(err.to_string().contains("is a directory"));
    }
}

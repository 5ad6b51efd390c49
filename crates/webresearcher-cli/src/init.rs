//! `webresearcher init`: write a default configuration file.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use webresearcher_core::config::{get_config_path, save_config, Config};

/// Create the config at `path` unless it exists. Returns whether it was written.
fn ensure_config(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    save_config(&Config::default(), Some(path)).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

/// Run the init command.
pub fn run(config_path: Option<&Path>) -> Result<()> {
    let path = config_path.map(Path::to_path_buf).unwrap_or_else(get_config_path);

    println!();
    println!("{}", "WebResearcher: Setup".cyan().bold());
    println!();

    if ensure_config(&path)? {
        println!("  {} created config at {}", "✓".green(), path.display());
        println!();
        println!(
            "{}",
            "  Set llm.apiKey and tools.serperApiKey (or LLM_API_KEY / SERPER_API_KEY), then run `webresearcher research`.".green()
        );
    } else {
        println!("  {} config already exists at {}", "✓".green(), path.display());
    }
    println!();

    Ok(())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_config_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        assert!(ensure_config(&path).unwrap());
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["agent"]["maxRounds"], 100);
    }

    #[test]
    fn ensure_config_keeps_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{\"llm\":{\"model\":\"mine\"}}").unwrap();
        assert!(!ensure_config(&path).unwrap());
        assert!(std::fs::read_to_string(&path).unwrap().contains("mine"));
    }
}

//! Shared CLI helpers: result printing, JSON output, event streaming.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use tokio::sync::mpsc;

use webresearcher_agent::{EventSink, ResearchEvent, WeaverResult};

/// Print a final answer with its termination label.
pub fn print_answer(prediction: &str, label: &str) {
    println!();
    println!("{} {}", "WebResearcher".cyan().bold(), format!("({label})").dimmed());
    println!("{prediction}");
    println!();
}

/// Print the woven report followed by any sections the writer never reached.
pub fn print_report(result: &WeaverResult) {
    println!();
    println!(
        "{} {}",
        "WebWeaver".cyan().bold(),
        format!(
            "({} sections, {} evidence items)",
            result.final_outline.sections.len(),
            result.memory_bank_size
        )
        .dimmed()
    );
    if result.final_report.is_empty() {
        println!("{}", "(no report)".dimmed());
    } else {
        println!("{}", result.final_report);
    }
    if !result.unwritten_sections.is_empty() {
        println!();
        println!("{}", "Unwritten sections:".yellow().bold());
        for title in &result.unwritten_sections {
            println!("  · {title}");
        }
    }
    println!();
}

/// Serialize `value` as pretty JSON into `path`.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize result")?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    eprintln!("{} wrote {}", "✓".green(), path.display());
    Ok(())
}

/// One event as a JSON line.
pub fn event_line(event: &ResearchEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"type\":\"status\",\"message\":\"unserializable event: {e}\"}}"))
}

/// Event sink whose events are printed to stderr by a background task.
pub fn spawn_event_printer() -> EventSink {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            eprintln!("{}", event_line(&event));
        }
    });
    EventSink::new(tx)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

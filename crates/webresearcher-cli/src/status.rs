//! `webresearcher status`: show configuration and key status.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use webresearcher_core::config::{get_config_path, load_config};

fn key_status(key: &str) -> String {
    if key.is_empty() {
        format!("{}", "· not configured".dimmed())
    } else {
        format!("{} (key set)", "✓".green())
    }
}

/// Run the status command.
pub fn run(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    let path = config_path.map(Path::to_path_buf).unwrap_or_else(get_config_path);

    println!();
    println!("{}", "WebResearcher Status".cyan().bold());
    println!();

    println!(
        "  {:<18} {} {}",
        "Config:".bold(),
        path.display(),
        if path.exists() {
            "✓".green().to_string()
        } else {
            "(not found)".red().to_string()
        }
    );
    println!("  {:<18} {}", "Model:".bold(), config.llm.model);
    println!("  {:<18} {}", "Endpoint:".bold(), config.llm.api_base);
    println!(
        "  {:<18} {}",
        "Parameters:".bold(),
        format!(
            "temp: {} | max_tokens: {} | protocol: {:?}",
            config.llm.temperature, config.llm.max_tokens, config.agent.protocol
        )
        .dimmed(),
    );
    println!(
        "  {:<18} {}",
        "Budgets:".bold(),
        format!(
            "rounds: {} | timeout: {}s | input tokens: {}",
            config.agent.max_rounds, config.agent.agent_timeout_secs, config.agent.max_input_tokens
        )
        .dimmed(),
    );

    println!();
    println!("  {}", "Keys:".bold());
    println!("    {:<20} {}", "LLM", key_status(&config.llm.api_key));
    println!("    {:<20} {}", "Serper", key_status(&config.tools.serper_api_key));
    println!("    {:<20} {}", "Jina", key_status(&config.tools.jina_api_key));

    println!();
    if config.tools.sandbox_endpoints.is_empty() {
        println!("  {:<18} {}", "Sandbox:".bold(), "local python3".dimmed());
    } else {
        println!("  {:<18} {}", "Sandbox:".bold(), config.tools.sandbox_endpoints.join(", "));
    }
    println!("  {:<18} {}", "Tools:".bold(), config.agent.tools.join(", "));
    println!();

    Ok(())
}

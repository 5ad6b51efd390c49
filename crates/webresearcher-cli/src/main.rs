//! WebResearcher CLI: entry point.
//!
//! # Commands
//!
//! - `webresearcher research QUESTION`: single-agent IterResearch run
//! - `webresearcher react QUESTION`: multi-turn ReAct baseline
//! - `webresearcher weave QUESTION`: planner/writer report
//! - `webresearcher tts QUESTION`: parallel runs, one aggregated answer
//! - `webresearcher status`: show configuration and key status
//! - `webresearcher init`: write a default config file

mod helpers;
mod init;
mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use webresearcher_agent::{
    research_tools, EventSink, ReactAgent, ResearchAgent, ToolDispatcher, TtsAgent, WebWeaverAgent,
};
use webresearcher_core::config::{load_config, Config, ProtocolKind};
use webresearcher_providers::{create_provider, LlmProvider};

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// WebResearcher: iterative deep-research agents
#[derive(Parser)]
#[command(name = "webresearcher", version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.webresearcher/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question with the single-agent research loop
    Research {
        question: String,

        /// Action protocol: tagged or function
        #[arg(long)]
        protocol: Option<ProtocolKind>,

        /// Override the round budget
        #[arg(long)]
        max_rounds: Option<u32>,

        /// Write the full result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stream progress events to stderr as JSON lines
        #[arg(long, default_value_t = false)]
        events: bool,
    },

    /// Answer with the ReAct baseline, which keeps the whole conversation
    React {
        question: String,

        /// Override the round budget
        #[arg(long)]
        max_rounds: Option<u32>,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stream progress events to stderr as JSON lines
        #[arg(long, default_value_t = false)]
        events: bool,
    },

    /// Write a cited report with the planner/writer agents
    Weave {
        question: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run several agents in parallel and aggregate their answers
    Tts {
        question: String,

        /// Number of parallel agents (defaults to tts.numAgents)
        #[arg(long)]
        agents: Option<usize>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show configuration and key status
    Status,

    /// Write a default config file
    Init,
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Research {
            question,
            protocol,
            max_rounds,
            output,
            events,
        } => {
            let mut config = load_config(config_path);
            if let Some(p) = protocol {
                config.agent.protocol = p;
            }
            if let Some(n) = max_rounds {
                config.agent.max_rounds = n;
            }
            run_research(&config, &question, output.as_deref(), events).await
        }
        Commands::React {
            question,
            max_rounds,
            output,
            events,
        } => {
            let mut config = load_config(config_path);
            if let Some(n) = max_rounds {
                config.agent.max_rounds = n;
            }
            run_react(&config, &question, output.as_deref(), events).await
        }
        Commands::Weave { question, output } => run_weave(&load_config(config_path), &question, output.as_deref()).await,
        Commands::Tts {
            question,
            agents,
            output,
        } => {
            let config = load_config(config_path);
            let agents = agents.unwrap_or(config.tts.num_agents);
            run_tts(&config, &question, agents, output.as_deref()).await
        }
        Commands::Status => status::run(config_path),
        Commands::Init => init::run(config_path),
    }
}

// ─────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────

async fn run_research(config: &Config, question: &str, output: Option<&Path>, events: bool) -> Result<()> {
    let provider = build_provider(config)?;
    let dispatcher = Arc::new(build_dispatcher(config));
    let sink = if events { helpers::spawn_event_printer() } else { EventSink::none() };
    let agent = ResearchAgent::new(provider, dispatcher, config).with_events(sink);

    let cancel = cancel_on_ctrl_c();
    let result = agent.run_with_cancel(question, cancel).await;

    helpers::print_answer(&result.prediction, &result.termination.to_string());
    if let Some(path) = output {
        helpers::write_json(path, &result)?;
    }
    Ok(())
}

async fn run_react(config: &Config, question: &str, output: Option<&Path>, events: bool) -> Result<()> {
    let provider = build_provider(config)?;
    let dispatcher = Arc::new(build_dispatcher(config));
    let sink = if events { helpers::spawn_event_printer() } else { EventSink::none() };
    let agent = ReactAgent::new(provider, dispatcher, config).with_events(sink);

    let cancel = cancel_on_ctrl_c();
    let outcome = agent.run_with_cancel(question, cancel).await;

    helpers::print_answer(&outcome.result.prediction, &outcome.result.termination.to_string());
    if let Some(path) = output {
        helpers::write_json(path, &outcome)?;
    }
    Ok(())
}

async fn run_weave(config: &Config, question: &str, output: Option<&Path>) -> Result<()> {
    let provider = build_provider(config)?;
    let agent = WebWeaverAgent::new(provider, research_tools(&config.tools), config);

    let cancel = cancel_on_ctrl_c();
    let result = agent.run_with_cancel(question, cancel).await;

    helpers::print_report(&result);
    if let Some(path) = output {
        helpers::write_json(path, &result)?;
    }
    Ok(())
}

async fn run_tts(config: &Config, question: &str, agents: usize, output: Option<&Path>) -> Result<()> {
    let provider = build_provider(config)?;
    let dispatcher = Arc::new(build_dispatcher(config));
    let agent = TtsAgent::new(provider, dispatcher, config);

    let cancel = cancel_on_ctrl_c();
    let result = agent.run_with_cancel(question, agents, cancel).await;

    helpers::print_answer(&result.result.prediction, &result.method.to_string());
    if let Some(path) = output {
        helpers::write_json(path, &result)?;
    }
    Ok(())
}

// ─────────────────────────────────────────────
// Wiring
// ─────────────────────────────────────────────

fn build_provider(config: &Config) -> Result<Arc<dyn LlmProvider>> {
    if !config.llm.is_configured() {
        warn!("no LLM API key configured; set llm.apiKey or LLM_API_KEY");
    }
    let provider = create_provider(&config.llm).context("failed to create LLM provider")?;
    info!(model = %config.llm.model, provider = provider.display_name(), "provider ready");
    Ok(provider)
}

fn build_dispatcher(config: &Config) -> ToolDispatcher {
    ToolDispatcher::from_tools(
        research_tools(&config.tools),
        &config.agent.tools,
        Duration::from_secs(config.agent.tool_timeout_secs),
    )
}

/// A token cancelled by the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            warn!("interrupted, finishing with a best-effort answer");
            token.cancel();
        }
    });
    cancel
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("webresearcher=debug,info")
        } else {
            EnvFilter::new("warn")
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_react_command() {
        let cli = Cli::try_parse_from(["webresearcher", "react", "Who wrote Dune?", "--max-rounds", "3", "--events"]).unwrap();
        match cli.command {
            Commands::React {
                question,
                max_rounds,
                output,
                events,
            } => {
                assert_eq!(question, "Who wrote Dune?");
                assert_eq!(max_rounds, Some(3));
                assert!(output.is_none());
                assert!(events);
            }
            _ => panic!("expected the react command"),
        }
    }

    #[test]
    fn test_parse_research_protocol() {
        let cli = Cli::try_parse_from(["webresearcher", "research", "q", "--protocol", "function"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Research {
                protocol: Some(ProtocolKind::Function),
                ..
            }
        ));
    }
}

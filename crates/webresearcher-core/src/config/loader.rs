//! Config loader: reads `~/.webresearcher/config.json`, merges env vars, and
//! applies legacy migrations.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.webresearcher/config.json`
//! 3. Legacy flat variables (`LLM_API_KEY`, `SERPER_API_KEY`, ...)
//! 4. Namespaced variables `WEBRESEARCHER_<SECTION>__<FIELD>`

use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::schema::Config;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);
    let config = load_config_from_path(&config_path);
    apply_env_overrides(config, &|key| std::env::var(key).ok())
}

/// Load config from a specific file path, without env overrides.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return Config::default();
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return Config::default();
        }
    };

    let mut raw: serde_json::Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            warn!("Failed to parse config JSON: {}", e);
            return Config::default();
        }
    };

    migrate_config(&mut raw);

    match serde_json::from_value(raw) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to deserialize config: {}", e);
            Config::default()
        }
    }
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply legacy config migrations.
///
/// Moves `agent.maxLlmCallPerRun` → `agent.maxRounds`.
fn migrate_config(raw: &mut serde_json::Value) {
    let Some(agent) = raw.get_mut("agent").and_then(|a| a.as_object_mut()) else {
        return;
    };
    if let Some(calls) = agent.remove("maxLlmCallPerRun") {
        if !agent.contains_key("maxRounds") {
            agent.insert("maxRounds".to_string(), calls);
            debug!("Migrated agent.maxLlmCallPerRun → agent.maxRounds");
        }
    }
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Legacy flat names are applied first so the namespaced form
/// (`WEBRESEARCHER_<SECTION>__<FIELD>`) wins when both are set.
fn apply_env_overrides(mut config: Config, env: &dyn Fn(&str) -> Option<String>) -> Config {
    // ────────────── legacy flat names ──────────────
    set_string(env, "LLM_API_KEY", &mut config.llm.api_key);
    set_string(env, "LLM_BASE_URL", &mut config.llm.api_base);
    set_string(env, "LLM_MODEL_NAME", &mut config.llm.model);
    set_string(env, "SERPER_API_KEY", &mut config.tools.serper_api_key);
    set_string(env, "JINA_API_KEY", &mut config.tools.jina_api_key);
    set_string(env, "FILE_DIR", &mut config.tools.file_dir);
    set_parsed(env, "MAX_LLM_CALL_PER_RUN", &mut config.agent.max_rounds);
    set_parsed(env, "AGENT_TIMEOUT", &mut config.agent.agent_timeout_secs);
    if let Some(val) = env("SANDBOX_FUSION_ENDPOINTS") {
        config.tools.sandbox_endpoints = split_list(&val);
    }

    // ────────────── llm ──────────────
    set_string(env, "WEBRESEARCHER_LLM__MODEL", &mut config.llm.model);
    set_string(env, "WEBRESEARCHER_LLM__API_BASE", &mut config.llm.api_base);
    set_string(env, "WEBRESEARCHER_LLM__API_KEY", &mut config.llm.api_key);
    set_parsed(env, "WEBRESEARCHER_LLM__MAX_TOKENS", &mut config.llm.max_tokens);
    set_parsed(env, "WEBRESEARCHER_LLM__TEMPERATURE", &mut config.llm.temperature);
    set_parsed(env, "WEBRESEARCHER_LLM__TOP_P", &mut config.llm.top_p);
    set_parsed(env, "WEBRESEARCHER_LLM__PRESENCE_PENALTY", &mut config.llm.presence_penalty);
    set_parsed(env, "WEBRESEARCHER_LLM__TIMEOUT_SECS", &mut config.llm.timeout_secs);
    set_parsed(env, "WEBRESEARCHER_LLM__MAX_RETRIES", &mut config.llm.max_retries);

    // ────────────── agent ──────────────
    set_parsed(env, "WEBRESEARCHER_AGENT__MAX_ROUNDS", &mut config.agent.max_rounds);
    set_parsed(env, "WEBRESEARCHER_AGENT__AGENT_TIMEOUT_SECS", &mut config.agent.agent_timeout_secs);
    set_parsed(env, "WEBRESEARCHER_AGENT__MAX_INPUT_TOKENS", &mut config.agent.max_input_tokens);
    set_parsed(env, "WEBRESEARCHER_AGENT__MAX_REPORT_CHARS", &mut config.agent.max_report_chars);
    set_parsed(env, "WEBRESEARCHER_AGENT__TOOL_TIMEOUT_SECS", &mut config.agent.tool_timeout_secs);
    set_parsed(
        env,
        "WEBRESEARCHER_AGENT__MAX_CONSECUTIVE_FAILURES",
        &mut config.agent.max_consecutive_failures,
    );
    set_parsed(env, "WEBRESEARCHER_AGENT__PROTOCOL", &mut config.agent.protocol);
    if let Some(val) = env("WEBRESEARCHER_AGENT__TOOLS") {
        config.agent.tools = split_list(&val);
    }

    // ────────────── weaver ──────────────
    set_parsed(env, "WEBRESEARCHER_WEAVER__MAX_ROUNDS", &mut config.weaver.max_rounds);
    set_parsed(env, "WEBRESEARCHER_WEAVER__TEMPERATURE", &mut config.weaver.temperature);
    set_parsed(env, "WEBRESEARCHER_WEAVER__MAX_IDLE_ROUNDS", &mut config.weaver.max_idle_rounds);

    // ────────────── tts ──────────────
    set_parsed(env, "WEBRESEARCHER_TTS__NUM_AGENTS", &mut config.tts.num_agents);
    set_parsed(env, "WEBRESEARCHER_TTS__TEMPERATURE_STEP", &mut config.tts.temperature_step);

    // ────────────── tools ──────────────
    set_string(env, "WEBRESEARCHER_TOOLS__SERPER_API_KEY", &mut config.tools.serper_api_key);
    set_string(env, "WEBRESEARCHER_TOOLS__SERPER_BASE_URL", &mut config.tools.serper_base_url);
    set_string(env, "WEBRESEARCHER_TOOLS__JINA_API_KEY", &mut config.tools.jina_api_key);
    set_string(env, "WEBRESEARCHER_TOOLS__JINA_BASE_URL", &mut config.tools.jina_base_url);
    set_string(env, "WEBRESEARCHER_TOOLS__FILE_DIR", &mut config.tools.file_dir);
    set_parsed(env, "WEBRESEARCHER_TOOLS__VISIT_MAX_CHARS", &mut config.tools.visit_max_chars);
    if let Some(val) = env("WEBRESEARCHER_TOOLS__SANDBOX_ENDPOINTS") {
        config.tools.sandbox_endpoints = split_list(&val);
    }

    config
}

fn set_string(env: &dyn Fn(&str) -> Option<String>, key: &str, target: &mut String) {
    if let Some(val) = env(key) {
        *target = val;
    }
}

/// Parse and assign; unparseable values are logged and ignored.
fn set_parsed<T: FromStr>(env: &dyn Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    if let Some(val) = env(key) {
        match val.trim().parse::<T>() {
            Ok(v) => *target = v,
            Err(_) => warn!(key = key, value = %val, "Ignoring unparseable environment override"),
        }
    }
}

fn split_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

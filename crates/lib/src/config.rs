//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.langchat/config.json`) and environment.
//! State files (persisted session, last-used thread) live next to the config file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Agent deployment settings (URL, assistant, model).
    #[serde(default)]
    pub agent: AgentConfig,

    /// Identity service settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Thread directory tuning.
    #[serde(default)]
    pub threads: ThreadsConfig,
}

/// Remote agent deployment and run defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Base URL of the agent deployment (default http://localhost:2024). Overridden by LANGCHAT_DEPLOYMENT_URL env.
    #[serde(default = "default_deployment_url")]
    pub deployment_url: String,

    /// Assistant (graph) id to run (default "agent"). Overridden by LANGCHAT_ASSISTANT_ID env.
    #[serde(default = "default_assistant_id")]
    pub assistant_id: String,

    /// Sent as `config.configurable.model_name` on each run (default "openai").
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Graph node whose message chunks make up the assistant reply (default "chatbot").
    #[serde(default = "default_node")]
    pub node: String,
}

/// Supabase-style identity service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Project URL (e.g. https://xyz.supabase.co). Overridden by SUPABASE_URL env.
    pub url: Option<String>,
    /// Public anon key sent as `apikey`. Overridden by SUPABASE_ANON_KEY env.
    pub anon_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadsConfig {
    /// Maximum threads fetched per refresh (default 100).
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    /// Trailing debounce window for refreshes, in milliseconds (default 300).
    #[serde(default = "default_refresh_debounce_ms")]
    pub refresh_debounce_ms: u64,
}

fn default_deployment_url() -> String {
    "http://localhost:2024".to_string()
}

fn default_assistant_id() -> String {
    "agent".to_string()
}

fn default_model_name() -> String {
    "openai".to_string()
}

fn default_node() -> String {
    "chatbot".to_string()
}

fn default_search_limit() -> usize {
    100
}

fn default_refresh_debounce_ms() -> u64 {
    300
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            deployment_url: default_deployment_url(),
            assistant_id: default_assistant_id(),
            model_name: default_model_name(),
            node: default_node(),
        }
    }
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self {
            search_limit: default_search_limit(),
            refresh_debounce_ms: default_refresh_debounce_ms(),
        }
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn trimmed(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the deployment URL: env LANGCHAT_DEPLOYMENT_URL overrides config. Trailing slashes are dropped.
pub fn resolve_deployment_url(config: &Config) -> String {
    env_non_empty("LANGCHAT_DEPLOYMENT_URL")
        .unwrap_or_else(|| config.agent.deployment_url.trim().to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Resolve the assistant id: env LANGCHAT_ASSISTANT_ID overrides config.
pub fn resolve_assistant_id(config: &Config) -> String {
    env_non_empty("LANGCHAT_ASSISTANT_ID")
        .or_else(|| trimmed(Some(&config.agent.assistant_id)))
        .unwrap_or_else(default_assistant_id)
}

/// Resolve the identity service URL: env SUPABASE_URL overrides config.
pub fn resolve_auth_url(config: &Config) -> Option<String> {
    env_non_empty("SUPABASE_URL")
        .or_else(|| trimmed(config.auth.url.as_ref()))
        .map(|u| u.trim_end_matches('/').to_string())
}

/// Resolve the anon key: env SUPABASE_ANON_KEY overrides config.
pub fn resolve_anon_key(config: &Config) -> Option<String> {
    env_non_empty("SUPABASE_ANON_KEY").or_else(|| trimmed(config.auth.anon_key.as_ref()))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("LANGCHAT_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".langchat").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Directory holding the config file (and state files).
pub fn config_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf()
}

/// Persisted auth session file beside the config.
pub fn session_path(config_path: &Path) -> PathBuf {
    config_dir(config_path).join("session.json")
}

/// Key/value state file beside the config (holds the last-used thread id).
pub fn state_path(config_path: &Path) -> PathBuf {
    config_dir(config_path).join("state.json")
}

/// Load config from the default path (or LANGCHAT_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving state files).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

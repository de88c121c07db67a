//! Engine configuration.
//!
//! Deserialized from TOML. Every numeric knob has a serde default matching
//! the engine's built-in constants, so a minimal config only needs provider
//! entries and a default model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Default model specifier, format "provider:model".
    #[serde(default)]
    pub default_model: Option<String>,
    /// Registered provider backends (data-driven: adding a backend = adding config).
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub summarize: SummarizeConfig,
    #[serde(default)]
    pub stepping: SteppingConfig,
    #[serde(default)]
    pub mcp: McpConfig,
}

impl EngineConfig {
    /// Load the config from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(format!("invalid config: {e}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Static model catalog. A specifier resolves only if its model is
    /// listed here and enabled.
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Cloud model-invocation envelope (`anthropic_version`, content as
    /// text-part arrays). Synchronous transport only; streaming is emulated.
    CloudInvoke,
    /// OpenAI-compatible chat completions with native SSE streaming.
    OpenaiCompat,
}

/// One model in a provider's static catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    /// Models marked `false` never get tools attached.
    #[serde(default = "d_true")]
    pub supports_tools: bool,
    #[serde(default = "d_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (for config-only setups; prefer env or keychain).
    #[serde(default)]
    pub key: Option<String>,
    /// Keychain service name.
    #[serde(default)]
    pub service: Option<String>,
    /// Keychain account name.
    #[serde(default)]
    pub account: Option<String>,
    /// Token-exchange endpoint for backends that require a fetched bearer
    /// token (the API key is exchanged for a short-lived bearer there).
    #[serde(default)]
    pub token_url: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget for the assembled prompt.
    #[serde(default = "d_3200")]
    pub token_budget: u32,
    /// Headroom reserved for the eventual response.
    #[serde(default = "d_128")]
    pub headroom: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: 3200,
            headroom: 128,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summarization trigger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeConfig {
    /// Token-estimate threshold that triggers summarization.
    #[serde(default = "d_3000")]
    pub token_threshold: u32,
    /// Turn-count threshold that triggers summarization.
    #[serde(default = "d_60")]
    pub turn_threshold: u32,
    /// Model used for summarization. Falls back to the request model.
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            token_threshold: 3000,
            turn_threshold: 60,
            model: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool stepping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SteppingConfig {
    /// Hard ceiling on model↔tool steps per request.
    #[serde(default = "d_20")]
    pub max_steps: u32,
    /// Steps 1..=forced_step_window are forced into tool use while the
    /// cumulative tool-call count stays below `min_tool_calls`.
    #[serde(default = "d_4")]
    pub forced_step_window: u32,
    #[serde(default = "d_5")]
    pub min_tool_calls: u32,
}

impl Default for SteppingConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            forced_step_window: 4,
            min_tool_calls: 5,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP tool subprocesses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_3200() -> u32 {
    3200
}
fn d_128() -> u32 {
    128
}
fn d_3000() -> u32 {
    3000
}
fn d_60() -> u32 {
    60
}
fn d_20() -> u32 {
    20
}
fn d_4() -> u32 {
    4
}
fn d_5() -> u32 {
    5
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.context.token_budget, 3200);
        assert_eq!(config.context.headroom, 128);
        assert_eq!(config.summarize.token_threshold, 3000);
        assert_eq!(config.summarize.turn_threshold, 60);
        assert_eq!(config.stepping.max_steps, 20);
        assert_eq!(config.stepping.forced_step_window, 4);
        assert_eq!(config.stepping.min_tool_calls, 5);
    }

    #[test]
    fn minimal_toml_parses() {
        let config = EngineConfig::from_toml_str(
            r#"
            default_model = "openai:gpt-4o"

            [[providers]]
            id = "openai"
            kind = "openai_compat"
            base_url = "https://api.openai.com/v1"
            auth = { env = "OPENAI_API_KEY" }
            models = [{ name = "gpt-4o" }]

            [[providers]]
            id = "cloud"
            kind = "cloud_invoke"
            base_url = "https://cloud.example.com/v1"
            auth = { env = "CLOUD_API_KEY", token_url = "https://cloud.example.com/token" }
            models = [
                { name = "claude-3-5-sonnet" },
                { name = "claude-instant", supports_tools = false },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(config.default_model.as_deref(), Some("openai:gpt-4o"));
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[1].kind, ProviderKind::CloudInvoke);
        let models = &config.providers[1].models;
        assert!(models[0].supports_tools && models[0].enabled);
        assert!(!models[1].supports_tools);
    }

    #[test]
    fn mcp_server_env_parses() {
        let config = EngineConfig::from_toml_str(
            r#"
            [[mcp.servers]]
            id = "repo"
            command = "repo-tools"
            args = ["--stdio"]
            env = { REPO_TOKEN = "t" }
            "#,
        )
        .unwrap();
        assert_eq!(config.mcp.servers.len(), 1);
        assert_eq!(config.mcp.servers[0].env.get("REPO_TOKEN").unwrap(), "t");
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = EngineConfig::from_toml_str("providers = 3").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn loads_from_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"default_model = \"openai:gpt-4o\"\n").unwrap();
        let config = EngineConfig::from_path(file.path()).unwrap();
        assert_eq!(config.default_model.as_deref(), Some("openai:gpt-4o"));
    }
}

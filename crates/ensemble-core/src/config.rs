//! Orchestration configuration
//!
//! The whole orchestration — the supervisor's model settings, the worker
//! definitions, and the loop limits — is described by one declarative
//! document, loaded once at process start and passed by reference into the
//! components that need it. `${VAR_NAME}` inside the document is expanded
//! from the environment before parsing, so API keys can stay out of the
//! file itself.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{Error, Result};

/// LLM Provider type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// OpenAI-compatible chat-completions API
    #[default]
    #[serde(alias = "OPENAI")]
    OpenAi,
    /// Anthropic Claude messages API
    #[serde(alias = "CLAUDE", alias = "anthropic")]
    Claude,
}

/// Model settings shared by the supervisor and every worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// API provider
    #[serde(default)]
    pub provider: LlmProvider,

    /// Model to use
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature (provider default when omitted)
    pub temperature: Option<f32>,

    /// Base URL (optional, for custom endpoints)
    pub base_url: Option<String>,

    /// API key; falls back to the provider's environment variable
    /// (`OPENAI_API_KEY` / `ANTHROPIC_API_KEY`) when omitted
    pub api_key: Option<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAi,
            model: default_model(),
            temperature: None,
            base_url: None,
            api_key: None,
        }
    }
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

/// A single worker agent definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDefinition {
    /// Unique name; doubles as the routing token the supervisor emits
    pub name: String,

    /// System instruction for this worker
    pub system_message: String,

    /// Identifiers of the tools this worker may invoke
    #[serde(default)]
    pub tools: Vec<String>,

    /// Model settings for this worker
    #[serde(flatten)]
    pub model: ModelSettings,
}

/// Loop bounds for a single request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    /// Maximum supervisor→worker cycles per request
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,

    /// Maximum model/tool round trips inside one worker execution
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,

    /// Maximum tokens per model completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_hops: default_max_hops(),
            max_tool_iterations: default_max_tool_iterations(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_hops() -> usize {
    6
}

fn default_max_tool_iterations() -> usize {
    8
}

fn default_max_tokens() -> u64 {
    4096
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port for the HTTP API server
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

/// Top-level orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Supervisor model settings
    pub supervisor: ModelSettings,

    /// Worker definitions; at least one is required
    pub workers: Vec<WorkerDefinition>,

    /// Loop limits
    #[serde(default)]
    pub limits: Limits,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,
}

impl OrchestrationConfig {
    /// Load configuration from a YAML or TOML file, chosen by extension.
    ///
    /// `${VAR_NAME}` in the file content is replaced with the value of the
    /// environment variable before parsing (empty string when unset).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config = match extension {
            "yaml" | "yml" => Self::from_yaml_str(&content)?,
            "toml" => Self::from_toml_str(&content)?,
            other => {
                return Err(Error::Config(format!(
                    "Unsupported config format '{}' (expected yaml, yml, or toml)",
                    other
                )));
            }
        };

        Ok(config)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| Error::Config(format!("Failed to parse YAML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = toml::from_str(&expanded)
            .map_err(|e| Error::Config(format!("Failed to parse TOML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants that serde cannot express.
    ///
    /// Worker names are routing tokens, so they must be unique and must not
    /// collide with the reserved vocabulary (`FINISH`, `supervisor`).
    pub fn validate(&self) -> Result<()> {
        if self.workers.is_empty() {
            return Err(Error::Config(
                "workers must contain at least one worker definition".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for worker in &self.workers {
            if worker.name.trim().is_empty() {
                return Err(Error::Config("worker name must not be empty".to_string()));
            }
            if worker.name == crate::agents::FINISH || worker.name == crate::agents::SUPERVISOR_NODE {
                return Err(Error::Config(format!(
                    "worker name '{}' is reserved",
                    worker.name
                )));
            }
            if !seen.insert(worker.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate worker name '{}'",
                    worker.name
                )));
            }
        }

        if self.limits.max_hops == 0 {
            return Err(Error::Config("limits.max_hops must be at least 1".to_string()));
        }
        if self.limits.max_tool_iterations == 0 {
            return Err(Error::Config(
                "limits.max_tool_iterations must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Names of all configured workers, in definition order
    pub fn worker_names(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.name.clone()).collect()
    }
}

/// Replace `${VAR_NAME}` with the value of the environment variable.
///
/// Unset variables expand to the empty string.
fn expand_env_vars(value: &str) -> String {
    let mut result = String::new();
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'

            let mut var_name = String::new();
            while let Some(&c) = chars.peek() {
                if c == '}' {
                    chars.next(); // consume '}'
                    break;
                }
                var_name.push(chars.next().unwrap());
            }

            if let Ok(env_value) = std::env::var(&var_name) {
                result.push_str(&env_value);
            }
        } else {
            result.push(c);
        }
    }

    result
}

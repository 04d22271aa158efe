//! Runtime configuration.
//!
//! The core never reads process state on its own: everything arrives
//! through an explicit [`RuntimeConfig`] record. [`RuntimeConfig::from_env`]
//! is the one boundary function that assembles a record from environment
//! variables for hosts that configure that way.
//!
//! ## Environment variables
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `ANTHROPIC_API_KEY` / `OPENAI_API_KEY` / `LLM_API_KEY` / `TAMALEBOT_API_KEY` | API key, first match wins |
//! | `TAMALEBOT_PROVIDER` | Provider override (`anthropic`, `openai`) |
//! | `TAMALEBOT_MODEL` | Model override |
//! | `TAMALEBOT_AGENT_ID` | Agent identifier |
//! | `TAMALEBOT_AGENT_NAME` | Display name |
//! | `TAMALEBOT_POLICY` | Policy name (`standard` or `open`) |
//! | `TAMALEBOT_MODE` | Free-form mode tag for the host |
//! | `TAMALEBOT_STORAGE_URL` | Persistent storage location |
//! | `TAMALEBOT_VAULT_KEY` | Vault key-derivation source |
//!
//! A missing API key is fatal at startup.

use crate::policy::PolicyConfig;
use crate::provider::ProviderKind;
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;

/// Environment variables consulted for the API key, in priority order.
const API_KEY_VARS: [&str; 4] = [
    "ANTHROPIC_API_KEY",
    "OPENAI_API_KEY",
    "LLM_API_KEY",
    "TAMALEBOT_API_KEY",
];

/// Default model when none is configured.
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Explicit configuration record for the core.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Provider API key.
    pub api_key: String,
    /// Provider override; detected from the model when absent.
    pub provider: Option<ProviderKind>,
    /// Model identifier.
    pub model: String,
    /// Agent identifier (audit files, vault salt, subprocess environment).
    pub agent_id: String,
    /// Display name.
    pub agent_name: String,
    /// Policy configuration.
    pub policy: PolicyConfig,
    /// Free-form mode tag, uninterpreted by the core.
    pub mode: Option<String>,
    /// Working directory for tools.
    pub working_dir: PathBuf,
    /// Persistent storage location, uninterpreted by the core.
    pub storage_url: Option<String>,
    /// Vault key-derivation source; no vault without one.
    pub vault_key: Option<String>,
    /// System prompt for the provider.
    pub system_prompt: Option<String>,
    /// Agent loop iteration bound.
    pub max_iterations: u32,
}

impl RuntimeConfig {
    /// A config with defaults around the two required values.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        let model = model.into();
        if api_key.trim().is_empty() {
            return Err(Error::config("API key cannot be empty"));
        }
        if model.trim().is_empty() {
            return Err(Error::config("model cannot be empty"));
        }
        Ok(Self {
            api_key,
            provider: None,
            model,
            agent_id: "tamalebot".to_string(),
            agent_name: "Tamalebot".to_string(),
            policy: PolicyConfig::standard(),
            mode: None,
            working_dir: PathBuf::from("."),
            storage_url: None,
            vault_key: None,
            system_prompt: None,
            max_iterations: crate::agent::DEFAULT_MAX_ITERATIONS,
        })
    }

    /// Assembles a config from the process environment.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Assembles a config from an explicit variable map. This is the
    /// testable core of [`from_env`](Self::from_env).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let api_key = API_KEY_VARS
            .iter()
            .find_map(|name| vars.get(*name))
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .ok_or_else(|| {
                Error::config(format!(
                    "no API key found; set one of {}",
                    API_KEY_VARS.join(", ")
                ))
            })?;

        let model = vars
            .get("TAMALEBOT_MODEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let mut config = Self::new(api_key, model)?;

        if let Some(provider) = vars.get("TAMALEBOT_PROVIDER") {
            config.provider = Some(provider.parse()?);
        }
        if let Some(agent_id) = vars.get("TAMALEBOT_AGENT_ID") {
            config.agent_id = agent_id.clone();
        }
        if let Some(agent_name) = vars.get("TAMALEBOT_AGENT_NAME") {
            config.agent_name = agent_name.clone();
        }
        if let Some(policy) = vars.get("TAMALEBOT_POLICY") {
            config.policy = match policy.as_str() {
                "open" => PolicyConfig {
                    name: "open".to_string(),
                    ..Default::default()
                },
                _ => PolicyConfig::standard(),
            };
        }
        config.mode = vars.get("TAMALEBOT_MODE").cloned();
        config.storage_url = vars.get("TAMALEBOT_STORAGE_URL").cloned();
        config.vault_key = vars.get("TAMALEBOT_VAULT_KEY").cloned();
        Ok(config)
    }

    /// Sets the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Sets the iteration bound.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Sets the policy configuration.
    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }
}

//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;

use crate::engine::EngineConfig;
use crate::platforms::simulator::SimulatorConfig;
use crate::sandbox::SandboxConfig;
use crate::strategy::builtin;
use crate::strategy::StrategyParams;
use crate::types::SessionLimits;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub currency: String,
    pub workers: usize,
    pub limits: SessionLimits,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            currency: "btc".to_string(),
            workers: 4,
            limits: SessionLimits::default(),
        }
    }
}

/// Which strategy to run: a built-in by name, or a script file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StrategyConfig {
    #[serde(default)]
    pub builtin: Option<String>,
    #[serde(default)]
    pub script: Option<String>,
    /// Handed to the strategy's `init`.
    #[serde(default)]
    pub params: StrategyParams,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    #[default]
    Simulated,
    Remote,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub kind: ServiceKind,
    #[serde(default)]
    pub simulated: SimulatorConfig,
    #[serde(default)]
    pub remote: Option<RemoteServiceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteServiceConfig {
    pub base_url: String,
    /// Name of the env var holding the API key. No key means unauthenticated.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
    /// Events kept for `/api/events`.
    pub event_capacity: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
            event_capacity: 500,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(contents).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field rules serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.session.workers == 0 {
            bail!("session.workers must be at least 1");
        }
        match (&self.strategy.builtin, &self.strategy.script) {
            (Some(_), Some(_)) => bail!("set either strategy.builtin or strategy.script, not both"),
            (None, None) => bail!("one of strategy.builtin or strategy.script is required"),
            (Some(name), None) if builtin::create(name).is_none() => bail!(
                "unknown built-in strategy '{name}' (expected one of: {})",
                builtin::NAMES.join(", ")
            ),
            _ => {}
        }
        if self.service.kind == ServiceKind::Remote && self.service.remote.is_none() {
            bail!("service.kind = \"remote\" needs a [service.remote] section");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

//! Configuration loading and parsing

use anyhow::{Context, Result};
use callback_bridge::BridgeConfig;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub demo: DemoConfig,
    #[serde(default)]
    pub handlers: HandlersConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// Which path through the callback lifecycle to exercise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    /// create, success, teardown, destroy
    Success,
    /// create, error, teardown, destroy
    Error,
    /// create, teardown, destroy
    Abandon,
    /// create here, invoke and destroy on another thread
    Transfer,
    /// guarded descriptors raced by worker threads
    Stress,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scenario::Success => write!(f, "success"),
            Scenario::Error => write!(f, "error"),
            Scenario::Abandon => write!(f, "abandon"),
            Scenario::Transfer => write!(f, "transfer"),
            Scenario::Stress => write!(f, "stress"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DemoConfig {
    #[serde(default = "default_scenario")]
    pub scenario: Scenario,
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    #[serde(default = "default_payload")]
    pub payload_a: String,
    #[serde(default = "default_payload")]
    pub payload_b: String,
    #[serde(default = "default_error_message")]
    pub error_message: String,
    /// Label stored in each built-in context
    #[serde(default = "default_label")]
    pub label: String,
    /// Worker threads for the stress scenario
    #[serde(default = "default_threads")]
    pub threads: usize,
}

fn default_scenario() -> Scenario {
    Scenario::Success
}

fn default_iterations() -> usize {
    1
}

fn default_payload() -> String {
    "test".to_string()
}

fn default_error_message() -> String {
    "failed".to_string()
}

fn default_label() -> String {
    "Flutter".to_string()
}

fn default_threads() -> usize {
    4
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            scenario: default_scenario(),
            iterations: default_iterations(),
            payload_a: default_payload(),
            payload_b: default_payload(),
            error_message: default_error_message(),
            label: default_label(),
            threads: default_threads(),
        }
    }
}

/// Entry points resolved from a shared library instead of the built-in ones
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HandlersConfig {
    pub library: Option<PathBuf>,
    #[serde(default = "default_success_symbol")]
    pub success_symbol: String,
    #[serde(default = "default_error_symbol")]
    pub error_symbol: String,
    #[serde(default = "default_teardown_symbol")]
    pub teardown_symbol: String,
    /// Optional `size_t fn(void)` producing a fresh context per descriptor
    pub context_symbol: Option<String>,
}

fn default_success_symbol() -> String {
    "fn_ok".to_string()
}

fn default_error_symbol() -> String {
    "fn_err".to_string()
}

fn default_teardown_symbol() -> String {
    "fn_drop".to_string()
}

impl Default for HandlersConfig {
    fn default() -> Self {
        Self {
            library: None,
            success_symbol: default_success_symbol(),
            error_symbol: default_error_symbol(),
            teardown_symbol: default_teardown_symbol(),
            context_symbol: None,
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .bridge
        .validate()
        .with_context(|| format!("Invalid [bridge] section in {:?}", path))?;

    if config.demo.iterations == 0 {
        anyhow::bail!("demo.iterations must be at least 1 in {:?}", path);
    }
    if config.demo.threads == 0 {
        anyhow::bail!("demo.threads must be at least 1 in {:?}", path);
    }

    Ok(config)
}

//! # Configuration
//!
//! Manages the loading and parsing of the application's configuration file (`config.yaml`).
//! Defines the structs for the chat service, command dispatch, the executor and sessions.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main application configuration structure.
/// Matches the layout of `data/config.yaml`.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub services: ServicesConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub system: SystemConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config.yaml")
    }

    /// Whether the user may run developer-only commands.
    pub fn is_dev(&self, user_id: &str) -> bool {
        self.commands.dev.iter().any(|d| d == user_id)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommandsConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// User ids allowed to run moderation commands.
    #[serde(default)]
    pub dev: Vec<String>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            dev: Vec::new(),
        }
    }
}

fn default_prefix() -> String {
    ".".to_string()
}

/// Queue bounds and timing for the command executor.
#[derive(Debug, Deserialize, Clone)]
pub struct ExecutorConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_admit_timeout_ms")]
    pub admit_timeout_ms: u64,
    /// Upper bound for a single action. `0` disables the cutoff.
    #[serde(default = "default_max_action_secs")]
    pub max_action_secs: u64,
}

impl ExecutorConfig {
    pub fn admit_timeout(&self) -> Duration {
        Duration::from_millis(self.admit_timeout_ms)
    }

    pub fn max_action_duration(&self) -> Option<Duration> {
        (self.max_action_secs > 0).then(|| Duration::from_secs(self.max_action_secs))
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            admit_timeout_ms: default_admit_timeout_ms(),
            max_action_secs: default_max_action_secs(),
        }
    }
}

fn default_capacity() -> usize {
    100
}
fn default_admit_timeout_ms() -> u64 {
    1000
}
fn default_max_action_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    #[serde(default = "default_exchange_timeout")]
    pub exchange_timeout_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl SessionsConfig {
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            exchange_timeout_secs: default_exchange_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_exchange_timeout() -> u64 {
    120
}
fn default_sweep_interval() -> u64 {
    5
}

/// System-level settings for the bot.
#[derive(Debug, Deserialize, Clone)]
pub struct SystemConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> String {
    "data".to_string()
}

/// Configuration for various connected services.
#[derive(Debug, Deserialize, Clone)]
pub struct ServicesConfig {
    pub matrix: MatrixConfig,
}

/// Specific configuration for the Matrix service.
#[derive(Debug, Deserialize, Clone)]
pub struct MatrixConfig {
    pub username: String,
    pub password: String,
    pub homeserver: String,
}

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use jsonschema::{JSONSchema, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::completion::CompletionConfig;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You play games. Use actions to interact with the game.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_periodic_interval_ms() -> Option<u64> {
    Some(10_000)
}

fn default_result_timeout_ms() -> Option<u64> {
    Some(60_000)
}

fn default_force_max_attempts() -> Option<u32> {
    Some(8)
}

fn default_force_retry_delay_ms() -> u64 {
    250
}

fn default_listen_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_outbound_capacity() -> usize {
    64
}

fn default_enabled_true() -> bool {
    true
}

fn default_logging_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_logging_filter() -> String {
    "info".to_string()
}

fn default_logging_rotation() -> LoggingRotation {
    LoggingRotation::Daily
}

fn default_logging_retention_days() -> usize {
    14
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// `None` disables periodic decisions entirely.
    #[serde(default = "default_periodic_interval_ms")]
    pub periodic_interval_ms: Option<u64>,
    /// Replaces the instruction sentence of the periodic prompt.
    #[serde(default)]
    pub periodic_prompt: Option<String>,
    /// `None` waits for an action result forever.
    #[serde(default = "default_result_timeout_ms")]
    pub result_timeout_ms: Option<u64>,
    /// `None` retries a forced decision until the model produces a valid choice.
    #[serde(default = "default_force_max_attempts")]
    pub force_max_attempts: Option<u32>,
    #[serde(default = "default_force_retry_delay_ms")]
    pub force_retry_delay_ms: u64,
}

impl DecisionConfig {
    pub fn periodic_interval(&self) -> Option<Duration> {
        self.periodic_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn result_timeout(&self) -> Option<Duration> {
        self.result_timeout_ms.map(|ms| Duration::from_millis(ms.max(1)))
    }

    pub fn force_retry_delay(&self) -> Duration {
        Duration::from_millis(self.force_retry_delay_ms)
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            periodic_interval_ms: default_periodic_interval_ms(),
            periodic_prompt: None,
            result_timeout_ms: default_result_timeout_ms(),
            force_max_attempts: default_force_max_attempts(),
            force_retry_delay_ms: default_force_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LoggingRotation {
    Daily,
    Hourly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_logging_filter")]
    pub filter: String,
    #[serde(default = "default_logging_rotation")]
    pub rotation: LoggingRotation,
    #[serde(default = "default_logging_retention_days")]
    pub retention_days: usize,
    #[serde(default = "default_enabled_true")]
    pub stderr_warn_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_logging_dir(),
            filter: default_logging_filter(),
            rotation: default_logging_rotation(),
            retention_days: default_logging_retention_days(),
            stderr_warn_enabled: true,
        }
    }
}

impl Config {
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let config_value: Value = json5::from_str(&config_content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;

        let config_base = config_path.parent().unwrap_or_else(|| Path::new("."));
        let schema_path = resolve_schema_path(config_base, &config_value)?;
        validate_against_schema(&config_value, &schema_path)?;

        let mut config: Config =
            serde_json::from_value(config_value).context("failed to deserialize config")?;

        if !config.logging.dir.is_absolute() {
            config.logging.dir = config_base.join(&config.logging.dir);
        }

        Ok(config)
    }
}

fn resolve_schema_path(config_base: &Path, config_value: &Value) -> Result<PathBuf> {
    if let Some(path_text) = config_value.get("$schema").and_then(|value| value.as_str()) {
        let configured = PathBuf::from(path_text);
        if configured.is_absolute() {
            return Ok(configured);
        }
        return Ok(config_base.join(&configured));
    }

    let local_default = config_base.join("gamemind.schema.json");
    if local_default.exists() {
        return Ok(local_default);
    }

    Err(anyhow!(
        "unable to resolve schema path: expected $schema in config or gamemind.schema.json next to it"
    ))
}

fn validate_against_schema(config_value: &Value, schema_path: &Path) -> Result<()> {
    let schema_content = fs::read_to_string(schema_path)
        .with_context(|| format!("failed to read schema {}", schema_path.display()))?;
    let schema: Value = serde_json::from_str(&schema_content)
        .with_context(|| format!("failed to parse schema {}", schema_path.display()))?;

    let compiled =
        JSONSchema::compile(&schema).map_err(|e| anyhow!("failed to compile schema: {e}"))?;

    match compiled.validate(config_value) {
        Ok(()) => Ok(()),
        Err(errors_iter) => {
            let validation_errors: Vec<ValidationError> = errors_iter.collect();
            let messages: Vec<String> = validation_errors
                .into_iter()
                .map(|error| error.to_string())
                .collect();
            Err(anyhow!("config validation failed: {}", messages.join("; ")))
        }
    }
}

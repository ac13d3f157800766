use crate::clerk::RetryPolicy;
use lazy_static::lazy_static;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub clerk: ClerkConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ClerkConfig {
    pub servers: Vec<String>,
    pub rpc_timeout_millis: u64,
    pub round_backoff_millis: Option<u64>,
    pub command_timeout_millis: Option<u64>,
}

impl Default for ClerkConfig {
    fn default() -> Self {
        Self {
            servers: vec![],
            rpc_timeout_millis: 500,
            round_backoff_millis: None,
            command_timeout_millis: None,
        }
    }
}

impl ClerkConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_millis)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_millis.map(Duration::from_millis)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            round_backoff: self.round_backoff_millis.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut file = File::open(path)?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    let config: Config = serde_yaml::from_str(&content)?;
    Ok(config)
}

lazy_static! {
    pub static ref CONFIG: Config = load_config(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(target: "config", "using default config, {}: {}", CONFIG_PATH, e);
        Config::default()
    });
}

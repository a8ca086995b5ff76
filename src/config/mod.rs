//! Daemon configuration, loaded once at startup from a YAML file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub github: GitHubConfig,
    pub app: AppConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive, e.g. `info` or `decompd=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    /// API token used for artifact and commit lookups and PR comments.
    pub token: String,
    /// Shared secret for webhook signature verification.
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Path to the objdiff-cli executable used to generate change reports.
    pub objdiff_path: PathBuf,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&text).context("failed to parse config file")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { address: default_address(), port: default_port() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

fn default_address() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".into()
}

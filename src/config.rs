//! Runner configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via STATEBIND_CONFIG or --config)
//! 3. Environment variables

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Runner configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Machine loading and one-shot run behaviour.
    pub runner: RunnerConfig,
    /// Interactive REPL settings.
    pub repl: ReplConfig,
    /// Log filter settings.
    pub log: LogConfig,
}

impl Config {
    /// Loads configuration from `path` (or STATEBIND_CONFIG), then applies
    /// environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os("STATEBIND_CONFIG").map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
    }

    /// Applies overrides read through `lookup` (the process environment in
    /// production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.runner.apply_overrides(&lookup);
        self.repl.apply_overrides(&lookup);
        self.log.apply_overrides(&lookup);
    }

    /// Fails when no machine file is configured.
    pub fn machine_path(&self) -> Result<&Path, ConfigError> {
        self.runner.machine.as_deref().ok_or_else(|| {
            ConfigError::ValidationError(
                "no machine file given (use --machine, STATEBIND_MACHINE or runner.machine)"
                    .to_string(),
            )
        })
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Machine loading and one-shot run behaviour.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Machine definition file (JSON or YAML).
    pub machine: Option<PathBuf>,
    /// Start the service before dispatching events.
    pub auto_start: bool,
    /// Print context and computed values after a run.
    pub print_context: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            machine: None,
            auto_start: true,
            print_context: true,
        }
    }
}

impl RunnerConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("STATEBIND_MACHINE") {
            self.machine = Some(PathBuf::from(path));
        }
        if let Some(flag) = lookup("STATEBIND_AUTO_START") {
            self.auto_start = parse_flag(&flag);
        }
    }
}

/// Interactive REPL settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReplConfig {
    /// History file. Defaults to `~/.statebind_history`.
    pub history: Option<PathBuf>,
}

impl ReplConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("STATEBIND_HISTORY") {
            self.history = Some(PathBuf::from(path));
        }
    }

    /// Resolved history file path.
    pub fn history_path(&self) -> PathBuf {
        self.history.clone().unwrap_or_else(|| {
            std::env::var("HOME")
                .map(|h| PathBuf::from(h).join(".statebind_history"))
                .unwrap_or_else(|_| ".statebind_history".into())
        })
    }
}

/// Log filter settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default `tracing` filter, used when RUST_LOG is unset.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
        }
    }
}

impl LogConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(filter) = lookup("STATEBIND_LOG") {
            if !filter.trim().is_empty() {
                self.filter = filter;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

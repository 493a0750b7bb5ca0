use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration loaded from `~/.colimator/config.toml`.
///
/// Every section is optional in the file; missing keys fall back to the
/// defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from `~/.colimator/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load and validate the file at `path`. A missing file is an error here.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(cfg)
    }

    /// Render as the TOML that `load_from` accepts.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reject values that parse but cannot work (zero timeouts, empty terminals).
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.process.validate()?;
        self.terminal.validate()?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".colimator")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

/// Limits applied to one-shot commands and log tails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Wall-clock bound for one-shot commands that do not set their own.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// How long to wait for a killed process to be reaped.
    #[serde(default = "default_termination_grace_ms")]
    pub termination_grace_ms: u64,
    /// How long to keep draining pipes after the child has exited.
    #[serde(default = "default_reader_grace_ms")]
    pub reader_grace_ms: u64,
    /// Buffered lines between tail readers and the consumer.
    #[serde(default = "default_tail_channel_capacity")]
    pub tail_channel_capacity: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            termination_grace_ms: default_termination_grace_ms(),
            reader_grace_ms: default_reader_grace_ms(),
            tail_channel_capacity: default_tail_channel_capacity(),
        }
    }
}

impl ProcessConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "process.default_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.tail_channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "process.tail_channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    pub fn reader_grace(&self) -> Duration {
        Duration::from_millis(self.reader_grace_ms)
    }
}

fn default_timeout_secs() -> u64 {
    60
}
fn default_termination_grace_ms() -> u64 {
    1000
}
fn default_reader_grace_ms() -> u64 {
    500
}
fn default_tail_channel_capacity() -> usize {
    1024
}

/// Settings for interactive PTY sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            term: default_term(),
            cols: default_cols(),
            rows: default_rows(),
        }
    }
}

impl TerminalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cols == 0 || self.rows == 0 {
            return Err(ConfigError::Validation(format!(
                "terminal size must be non-zero (got {}x{})",
                self.cols, self.rows
            )));
        }
        Ok(())
    }
}

fn default_term() -> String {
    "xterm-256color".into()
}
fn default_cols() -> u16 {
    80
}
fn default_rows() -> u16 {
    24
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_follow_millisecond_fields() {
        let cfg = ProcessConfig {
            termination_grace_ms: 250,
            reader_grace_ms: 75,
            ..ProcessConfig::default()
        };
        assert_eq!(cfg.termination_grace(), Duration::from_millis(250));
        assert_eq!(cfg.reader_grace(), Duration::from_millis(75));
    }

    #[test]
    fn default_path_ends_in_colimator_dir() {
        let path = Config::default_path();
        assert!(path.ends_with(".colimator/config.toml"));
    }
}

//! Server configuration.
//!
//! Configuration is layered, later sources winning:
//! 1. Default values
//! 2. Config file (`$PRIVOICE_CONFIG` or `~/.privoice/config.toml`)
//! 3. Environment variables (`TOKEN`, `PORT`) and command-line flags

use anyhow::{Context, Result};
use pv_core::voice::LifecycleConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::cli::Cli;

/// Server configuration
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Discord bot token
    pub token: String,

    /// Port for the liveness endpoint
    pub port: u16,

    /// Prefix that marks a chat message as a command
    pub command_prefix: String,

    /// Marker prepended to every room name
    pub voice_prefix: String,

    /// Maximum channel name length, in characters
    pub name_limit: usize,

    /// Seconds between expiry sweeps
    pub sweep_interval_secs: u64,

    /// Seconds a room may stay unjoined before it can be reclaimed
    pub channel_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: String::new(),
            port: 8080,
            command_prefix: "!".to_string(),
            voice_prefix: "PV: ".to_string(),
            name_limit: 100,
            sweep_interval_secs: 10,
            channel_ttl_secs: 30,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("token", &if self.token.is_empty() { "" } else { "<redacted>" })
            .field("port", &self.port)
            .field("command_prefix", &self.command_prefix)
            .field("voice_prefix", &self.voice_prefix)
            .field("name_limit", &self.name_limit)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("channel_ttl_secs", &self.channel_ttl_secs)
            .finish()
    }
}

impl Config {
    /// Load the file named by the command line (or the default path), then
    /// apply environment and flag overrides, then validate.
    pub fn load(cli: &Cli) -> Result<Self> {
        let path = cli.config.clone().unwrap_or_else(Self::default_path);
        let mut config = Self::load_from(&path)?;
        config.apply(cli);
        config.validate()?;
        Ok(config)
    }

    /// Read a config file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// `~/.privoice/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".privoice")
            .join("config.toml")
    }

    /// Overlay values given on the command line or in the environment.
    pub fn apply(&mut self, cli: &Cli) {
        if let Some(token) = &cli.token {
            self.token = token.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(prefix) = &cli.command_prefix {
            self.command_prefix = prefix.clone();
        }
        if let Some(prefix) = &cli.voice_prefix {
            self.voice_prefix = prefix.clone();
        }
        if let Some(secs) = cli.sweep_interval_secs {
            self.sweep_interval_secs = secs;
        }
        if let Some(secs) = cli.channel_ttl_secs {
            self.channel_ttl_secs = secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.token.trim().is_empty() {
            return Err(ConfigValidationError::MissingToken);
        }

        if self.command_prefix.is_empty() {
            return Err(ConfigValidationError::InvalidValue {
                field: "command_prefix".into(),
                message: "must not be empty".into(),
            });
        }

        if self.sweep_interval_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "sweep_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.channel_ttl_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "channel_ttl_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.voice_prefix.chars().count() >= self.name_limit {
            return Err(ConfigValidationError::InvalidValue {
                field: "voice_prefix".into(),
                message: format!("must be shorter than name_limit ({})", self.name_limit),
            });
        }

        Ok(())
    }

    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            voice_prefix: self.voice_prefix.clone(),
            name_limit: self.name_limit,
            ttl: Duration::from_secs(self.channel_ttl_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Configuration validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("a bot token is required (set TOKEN or `token` in the config file)")]
    MissingToken,

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::tempdir;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["pv-server"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn valid() -> Config {
        Config {
            token: "secret".into(),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.command_prefix, "!");
        assert_eq!(config.voice_prefix, "PV: ");
        assert_eq!(config.name_limit, 100);
        assert_eq!(config.sweep_interval(), Duration::from_secs(10));
        assert_eq!(config.lifecycle().ttl, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = tempdir().expect("Failed to create temp dir");
        let config = Config::load_from(&temp.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = tempdir().expect("Failed to create temp dir");
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "token = \"abc\"\nchannel_ttl_secs = 120\n").unwrap();

        let config = Config::load_from(&path).unwrap();

        assert_eq!(config.token, "abc");
        assert_eq!(config.channel_ttl_secs, 120);
        assert_eq!(config.sweep_interval_secs, 10);
        assert_eq!(config.command_prefix, "!");
    }

    #[test]
    fn test_malformed_file_is_error() {
        let temp = tempdir().expect("Failed to create temp dir");
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let temp = tempdir().expect("Failed to create temp dir");
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "token = \"from-file\"\nname_limit = 50\n").unwrap();
        let path_arg = path.to_string_lossy().to_string();

        let config = Config::load(&cli(&[
            "--config",
            &path_arg,
            "--token",
            "from-flag",
            "--sweep-interval-secs",
            "3",
        ]))
        .unwrap();

        assert_eq!(config.token, "from-flag");
        assert_eq!(config.name_limit, 50);
        assert_eq!(config.sweep_interval_secs, 3);
    }

    #[test]
    fn test_validation() {
        assert!(valid().validate().is_ok());

        assert_eq!(Config::default().validate(), Err(ConfigValidationError::MissingToken));

        let mut config = valid();
        config.sweep_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.channel_ttl_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.command_prefix = String::new();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.name_limit = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", valid());
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }
}

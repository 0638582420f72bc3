//! Configuration system for Reconstream.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;
use crate::session::SessionConfig;

/// Main configuration struct for Reconstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener settings
    pub server: ServerConfig,
    /// Session admission and eviction settings
    pub sessions: SessionsConfig,
    /// Defaults for per-session configuration
    pub defaults: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Largest accepted request body or stream frame, in bytes
    pub max_message_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_message_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Maximum number of live sessions
    pub max_sessions: usize,
    /// Idle time after which a session expires (0 disables expiry)
    pub session_timeout_secs: u64,
    /// Interval between background sweeps
    pub sweep_interval_secs: u64,
    /// Directory under which per-session scratch directories are created
    pub scratch_root: Option<PathBuf>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_sessions: 100,
            session_timeout_secs: 3600,
            sweep_interval_secs: 300,
            scratch_root: None,
        }
    }
}

impl SessionsConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Resolve the scratch root, falling back to the system temp directory.
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("reconstream"))
    }
}

/// Everything [`Config::validate`] found, in the order it was found.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// No error-level issues (warnings are allowed).
    pub fn is_ok(&self) -> bool {
        self.of(IssueSeverity::Error).next().is_none()
    }

    pub fn of(&self, severity: IssueSeverity) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }

    fn push(&mut self, severity: IssueSeverity, field: &str, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity,
            field: field.to_string(),
            message: message.into(),
        });
    }
}

/// One problem with one configuration key.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    /// Dotted key, e.g. `sessions.max_sessions`
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Errors stop the server from starting; warnings are only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    Warning,
    Error,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Later sources win: defaults, user config, `./reconstream.toml`, an
    /// explicit file, then `RECONSTREAM_*` variables (`__` separates nested
    /// keys, e.g. `RECONSTREAM_SESSIONS__MAX_SESSIONS=8`).
    pub fn load(explicit: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(Self::config_dir().join("config.toml")))
            .merge(Toml::file("reconstream.toml"));

        if let Some(path) = explicit {
            figment = figment.merge(Toml::file(path));
        }

        figment
            .merge(Env::prefixed("RECONSTREAM_").split("__"))
            .extract()
    }

    /// Load and validate configuration.
    pub fn load_validated(explicit: Option<&Path>) -> Result<Self, Error> {
        let config = Self::load(explicit).map_err(|e| Error::Config(e.to_string()))?;
        config.into_validated()
    }

    /// Reject configurations with errors, logging any warnings.
    pub fn into_validated(self) -> Result<Self, Error> {
        let result = self.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .of(IssueSeverity::Error)
                .map(ToString::to_string)
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.of(IssueSeverity::Warning) {
            tracing::warn!("Config warning - {}", warning);
        }

        Ok(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        use IssueSeverity::{Error as Fatal, Warning};
        let mut result = ValidationResult::default();

        if self.server.host.is_empty() {
            result.push(Fatal, "server.host", "host cannot be empty");
        }

        if self.server.max_message_bytes < 1024 {
            result.push(
                Fatal,
                "server.max_message_bytes",
                "max_message_bytes must be at least 1024",
            );
        }

        if self.sessions.max_sessions == 0 {
            result.push(
                Fatal,
                "sessions.max_sessions",
                "max_sessions must be greater than 0",
            );
        }

        if self.sessions.sweep_interval_secs == 0 {
            result.push(
                Fatal,
                "sessions.sweep_interval_secs",
                "sweep_interval_secs must be greater than 0",
            );
        }

        if self.sessions.session_timeout_secs == 0 {
            result.push(
                Warning,
                "sessions.session_timeout_secs",
                "idle expiry is disabled; sessions are only evicted at capacity",
            );
        }

        if let Err(e) = self.defaults.validate() {
            result.push(Fatal, "defaults", e.to_string());
        }

        if self.defaults.process_res > 1024 {
            result.push(
                Warning,
                "defaults.process_res",
                "process_res above 1024 makes reconstructions slow",
            );
        }

        result
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("reconstream"))
            .unwrap_or_else(|| PathBuf::from("~/.config/reconstream"))
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_ok(), "Default config should be valid: {:?}", result.issues);
    }

    #[test]
    fn test_zero_max_sessions_is_error() {
        let mut config = Config::default();
        config.sessions.max_sessions = 0;
        let result = config.validate();
        assert!(!result.is_ok());
        assert!(result
            .of(IssueSeverity::Error)
            .any(|e| e.field == "sessions.max_sessions"));
    }

    #[test]
    fn test_disabled_timeout_is_warning() {
        let mut config = Config::default();
        config.sessions.session_timeout_secs = 0;
        let result = config.validate();
        assert!(result.is_ok());
        assert!(result
            .of(IssueSeverity::Warning)
            .any(|e| e.field == "sessions.session_timeout_secs"));
    }

    #[test]
    fn test_invalid_defaults_are_errors() {
        let mut config = Config::default();
        config.defaults.max_images = 0;
        assert!(config.into_validated().is_err());

        let mut config = Config::default();
        config.defaults.process_res = 100_000;
        let result = config.validate();
        assert!(!result.is_ok());
        assert!(result.of(IssueSeverity::Error).any(|e| e.field == "defaults"));
    }

    #[test]
    fn test_toml_overrides() {
        let dir = std::env::temp_dir().join(format!("reconstream-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("custom.toml");
        std::fs::write(
            &path,
            "[sessions]\nmax_sessions = 7\n\n[defaults]\nmax_images = 12\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.sessions.max_sessions, 7);
        assert_eq!(config.defaults.max_images, 12);
        assert_eq!(config.server.port, 8000);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_renders_as_toml() {
        let text = Config::default().to_toml().unwrap();
        assert!(text.contains("[sessions]"));
        assert!(text.contains("max_sessions = 100"));
    }
}

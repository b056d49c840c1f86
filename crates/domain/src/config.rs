use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub timeline: TimelineConfig,
}

impl Config {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Validate, returning issues rather than failing fast so the caller
    /// can log all of them at once.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.server.port == 0 {
            issues.push(ConfigIssue::error("server.port must be non-zero"));
        }
        if self.timeline.default_page_size == 0 {
            issues.push(ConfigIssue::error("timeline.default_page_size must be >= 1"));
        }
        if self.timeline.max_page_size < self.timeline.default_page_size {
            issues.push(ConfigIssue::error(
                "timeline.max_page_size must be >= timeline.default_page_size",
            ));
        }
        if self.timeline.execution_debounce_ttl_ms < self.timeline.execution_debounce_ms {
            issues.push(ConfigIssue::warning(
                "timeline.execution_debounce_ttl_ms is shorter than the debounce window",
            ));
        }
        if self.timeline.permission_debounce_ttl_ms < self.timeline.permission_debounce_ms {
            issues.push(ConfigIssue::warning(
                "timeline.permission_debounce_ttl_ms is shorter than the debounce window",
            ));
        }
        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root for per-session directories (`<state_path>/sessions/<id>/`).
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineConfig {
    #[serde(default = "d_50")]
    pub default_page_size: usize,
    #[serde(default = "d_500")]
    pub max_page_size: usize,
    /// Circuit-breaker window for repeated execution updates.
    #[serde(default = "d_1000")]
    pub execution_debounce_ms: u64,
    /// How long an execution debounce key lingers before cleanup.
    #[serde(default = "d_5000")]
    pub execution_debounce_ttl_ms: u64,
    #[serde(default = "d_1000")]
    pub permission_debounce_ms: u64,
    #[serde(default = "d_2000")]
    pub permission_debounce_ttl_ms: u64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 500,
            execution_debounce_ms: 1000,
            execution_debounce_ttl_ms: 5000,
            permission_debounce_ms: 1000,
            permission_debounce_ttl_ms: 2000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    3420
}
fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}
fn d_50() -> usize {
    50
}
fn d_500() -> usize {
    500
}
fn d_1000() -> u64 {
    1000
}
fn d_2000() -> u64 {
    2000
}
fn d_5000() -> u64 {
    5000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_empty());
        assert_eq!(config.timeline.default_page_size, 50);
        assert_eq!(config.timeline.execution_debounce_ms, 1000);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 8080
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.timeline.max_page_size, 500);
    }

    #[test]
    fn page_size_inversion_is_an_error() {
        let mut config = Config::default();
        config.timeline.default_page_size = 100;
        config.timeline.max_page_size = 10;
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn short_ttl_is_a_warning() {
        let mut config = Config::default();
        config.timeline.execution_debounce_ttl_ms = 10;
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Warning));
    }
}

//! Configuration loading for the bias audit tools
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file is not an error: the tools start with defaults and log
//! a warning. A TOML file that exists but cannot be read or parsed is a
//! configuration error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the backend base URL
pub const ENV_BACKEND_URL: &str = "BIAS_AUDIT_BACKEND_URL";

/// Environment variable overriding the log level
pub const ENV_LOG_LEVEL: &str = "BIAS_AUDIT_LOG_LEVEL";

/// Contents of `config.toml`; every section may be omitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Base URL of the scoring backend
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Per-request timeout for backend calls, in seconds
    ///
    /// Full audits grade every row with the model, so this is generous.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Rows drawn for the stage-3 variation review
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Magnitude used when sampling variations for review
    #[serde(default = "default_sample_magnitude")]
    pub sample_magnitude: i64,

    /// Gaussian kernel bandwidth for bias distribution curves
    #[serde(default = "default_kde_bandwidth")]
    pub kde_bandwidth: f64,

    /// `[logging]` section
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Write logs here instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            request_timeout_secs: default_request_timeout_secs(),
            sample_size: default_sample_size(),
            sample_magnitude: default_sample_magnitude(),
            kde_bandwidth: default_kde_bandwidth(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_backend_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_sample_size() -> usize {
    5
}

fn default_sample_magnitude() -> i64 {
    50
}

fn default_kde_bandwidth() -> f64 {
    0.1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Parse a TOML document and check value ranges
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.backend_url.trim().is_empty() {
            return Err(Error::Config("backend_url must not be empty".to_string()));
        }
        if !(self.kde_bandwidth.is_finite() && self.kde_bandwidth > 0.0) {
            return Err(Error::Config(format!(
                "kde_bandwidth must be a positive number, got {}",
                self.kde_bandwidth
            )));
        }
        if self.sample_size == 0 {
            return Err(Error::Config("sample_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Command-line overrides, highest priority tier
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub backend_url: Option<String>,
    pub log_level: Option<String>,
}

/// Resolves the effective configuration from all tiers
pub struct ConfigResolver {
    overrides: CliOverrides,
}

impl ConfigResolver {
    pub fn new(overrides: CliOverrides) -> Self {
        Self { overrides }
    }

    /// Resolve configuration: CLI → ENV → TOML → defaults
    pub fn resolve(&self) -> Result<TomlConfig> {
        let mut config = match self.toml_path() {
            Some(path) => load_toml_config(&path)?,
            None => {
                warn!("No config file found, using compiled defaults");
                TomlConfig::default()
            }
        };

        // Tier 2: environment
        if let Some(url) = non_empty_env(ENV_BACKEND_URL) {
            config.backend_url = url;
        }
        if let Some(level) = non_empty_env(ENV_LOG_LEVEL) {
            config.logging.level = level;
        }

        // Tier 1: command line
        if let Some(url) = &self.overrides.backend_url {
            config.backend_url = url.clone();
        }
        if let Some(level) = &self.overrides.log_level {
            config.logging.level = level.clone();
        }

        config.validate()?;
        Ok(config)
    }

    fn toml_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.overrides.config_path {
            return Some(path.clone());
        }
        default_config_path().filter(|p| p.exists())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Default configuration file path for the platform
///
/// `~/.config/bias-audit/config.toml` on Linux, the platform config
/// directory elsewhere.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bias-audit").join("config.toml"))
}

/// Load TOML configuration from a path
///
/// A missing file yields defaults with a warning. An unreadable or malformed
/// file is an error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!("Config file not found: {}, using defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config = TomlConfig::from_toml_str(&content)?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write TOML configuration atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

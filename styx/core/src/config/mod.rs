//! TOML Configuration File Support
//!
//! Centralized configuration loading for the styx daemon, supporting a TOML
//! configuration file at `~/.config/styx/styx.toml`.
//!
//! # Configuration Priority
//!
//! Values are loaded with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables (`STYX_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [listen]
//! targets = ["tcp://127.0.0.1:5640", "file:///run/styx/styx.sock"]
//! sandbox_root = "/srv/styx"
//! backlog = 5
//!
//! [store]
//! kind = "memory"
//! read_only = false
//! path_rewrite = "/exports"
//!
//! [logging]
//! level = "info"
//! file = "/var/log/styx.log"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orchestrator::{ServeOptions, DEFAULT_BACKLOG};
use crate::store::{StoreKind, StoreOptions};
use crate::target::ClassifyOptions;

/// Target served when nothing else is configured
pub const DEFAULT_TARGET: &str = "tcp://127.0.0.1:5640";

/// Log levels accepted by `logging.level`
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// An environment variable holds an unusable value
    #[error("Invalid value for {var}: {reason}")]
    EnvError {
        /// Variable name
        var: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[listen]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenToml {
    /// Target URLs to listen on or dial
    pub targets: Option<Vec<String>>,

    /// Directory that `file://` paths are resolved under
    pub sandbox_root: Option<PathBuf>,

    /// Listen backlog
    pub backlog: Option<u32>,
}

/// `[store]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreToml {
    /// Store implementation
    pub kind: Option<StoreKind>,

    /// Reject writes
    pub read_only: Option<bool>,

    /// Prefix prepended to client paths
    pub path_rewrite: Option<String>,
}

/// `[logging]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingToml {
    /// Log level
    pub level: Option<String>,

    /// Log to this file instead of stderr
    pub file: Option<PathBuf>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StyxToml {
    /// Listen configuration section
    pub listen: ListenToml,

    /// Store configuration section
    pub store: StoreToml,

    /// Logging configuration section
    pub logging: LoggingToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Effective daemon configuration after all layers are applied
#[derive(Clone, Debug)]
pub struct StyxConfig {
    /// Target URLs, served concurrently
    pub targets: Vec<String>,

    /// Directory that `file://` paths are resolved under
    pub sandbox_root: Option<PathBuf>,

    /// Listen backlog
    pub backlog: u32,

    /// Store implementation
    pub store: StoreKind,

    /// Reject writes
    pub read_only: bool,

    /// Prefix prepended to client paths
    pub path_rewrite: Option<String>,

    /// Log level
    pub log_level: String,

    /// Log file, stderr when unset
    pub log_file: Option<PathBuf>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for StyxConfig {
    fn default() -> Self {
        Self {
            targets: vec![DEFAULT_TARGET.to_string()],
            sandbox_root: None,
            backlog: DEFAULT_BACKLOG,
            store: StoreKind::default(),
            read_only: false,
            path_rewrite: None,
            log_level: "info".to_string(),
            log_file: None,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl StyxConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Options for the orchestrator
    #[must_use]
    pub fn serve_options(&self) -> ServeOptions {
        ServeOptions {
            classify: ClassifyOptions {
                sandbox_root: self.sandbox_root.clone(),
            },
            backlog: self.backlog,
        }
    }

    /// Options for the store
    #[must_use]
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            read_only: self.read_only,
            path_rewrite: self.path_rewrite.clone(),
        }
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for an empty target list, a
    /// zero backlog or an unknown log level.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one listen target is required".to_string(),
            ));
        }
        if self.targets.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "listen targets must not be empty".to_string(),
            ));
        }
        if self.backlog == 0 {
            return Err(ConfigError::ValidationError(
                "backlog must be greater than zero".to_string(),
            ));
        }
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown log level '{}'",
                self.log_level
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/styx/styx.toml` or `~/.config/styx/styx.toml` if
/// `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("styx").join("styx.toml"))
}

/// Load configuration from the default path and the environment
///
/// CLI arguments are not handled here; apply [`ConfigOverrides`] after.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or an
/// environment variable holds an unusable value. A missing config file is
/// not an error (defaults are used).
pub fn load_config() -> Result<StyxConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or an environment variable holds an unusable value.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<StyxConfig, ConfigError> {
    load_layers(path, |var| std::env::var(var).ok())
}

fn load_layers(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<StyxConfig, ConfigError> {
    let mut config = StyxConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: StyxToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env)?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut StyxConfig, toml: &StyxToml) {
    // Listen settings
    if let Some(ref targets) = toml.listen.targets {
        config.targets.clone_from(targets);
    }
    if toml.listen.sandbox_root.is_some() {
        config.sandbox_root.clone_from(&toml.listen.sandbox_root);
    }
    if let Some(backlog) = toml.listen.backlog {
        config.backlog = backlog;
    }

    // Store settings
    if let Some(kind) = toml.store.kind {
        config.store = kind;
    }
    if let Some(read_only) = toml.store.read_only {
        config.read_only = read_only;
    }
    if toml.store.path_rewrite.is_some() {
        config.path_rewrite.clone_from(&toml.store.path_rewrite);
    }

    // Logging settings
    if let Some(ref level) = toml.logging.level {
        config.log_level.clone_from(level);
    }
    if toml.logging.file.is_some() {
        config.log_file.clone_from(&toml.logging.file);
    }
}

/// Split a comma-separated target list
#[must_use]
pub fn parse_target_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_flag(value: &str) -> bool {
    value != "0" && value.to_lowercase() != "false"
}

/// Apply environment variable overrides to the config
fn apply_env_config(
    config: &mut StyxConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    // Listen settings from environment
    if let Some(targets) = env("STYX_LISTEN") {
        config.targets = parse_target_list(&targets);
        config.source = ConfigSource::Env;
    }
    if let Some(root) = env("STYX_SANDBOX_ROOT") {
        config.sandbox_root = Some(PathBuf::from(root));
        config.source = ConfigSource::Env;
    }
    if let Some(backlog) = env("STYX_BACKLOG") {
        config.backlog = backlog.parse::<u32>().map_err(|e| ConfigError::EnvError {
            var: "STYX_BACKLOG",
            reason: e.to_string(),
        })?;
        config.source = ConfigSource::Env;
    }

    // Store settings from environment
    if let Some(kind) = env("STYX_STORE") {
        config.store = kind.parse::<StoreKind>().map_err(|reason| ConfigError::EnvError {
            var: "STYX_STORE",
            reason,
        })?;
        config.source = ConfigSource::Env;
    }
    if let Some(read_only) = env("STYX_READ_ONLY") {
        config.read_only = parse_flag(&read_only);
        config.source = ConfigSource::Env;
    }
    if let Some(prefix) = env("STYX_PATH_REWRITE") {
        config.path_rewrite = Some(prefix);
        config.source = ConfigSource::Env;
    }

    // Logging settings from environment
    if let Some(level) = env("STYX_LOG_LEVEL") {
        config.log_level = level;
        config.source = ConfigSource::Env;
    }
    if let Some(file) = env("STYX_LOG_FILE") {
        config.log_file = Some(PathBuf::from(file));
        config.source = ConfigSource::Env;
    }

    Ok(())
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Targets override
    pub targets: Option<Vec<String>>,

    /// Sandbox root override
    pub sandbox_root: Option<PathBuf>,

    /// Backlog override
    pub backlog: Option<u32>,

    /// Store kind override
    pub store: Option<StoreKind>,

    /// Read-only override
    pub read_only: Option<bool>,

    /// Path rewrite override
    pub path_rewrite: Option<String>,

    /// Log level override
    pub log_level: Option<String>,

    /// Log file override
    pub log_file: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set targets override
    #[must_use]
    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = Some(targets);
        self
    }

    /// Set backlog override
    #[must_use]
    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = Some(backlog);
        self
    }

    fn is_empty(&self) -> bool {
        self.targets.is_none()
            && self.sandbox_root.is_none()
            && self.backlog.is_none()
            && self.store.is_none()
            && self.read_only.is_none()
            && self.path_rewrite.is_none()
            && self.log_level.is_none()
            && self.log_file.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut StyxConfig) {
        if !self.is_empty() {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref targets) = self.targets {
            config.targets.clone_from(targets);
        }
        if self.sandbox_root.is_some() {
            config.sandbox_root.clone_from(&self.sandbox_root);
        }
        if let Some(backlog) = self.backlog {
            config.backlog = backlog;
        }
        if let Some(store) = self.store {
            config.store = store;
        }
        if let Some(read_only) = self.read_only {
            config.read_only = read_only;
        }
        if self.path_rewrite.is_some() {
            config.path_rewrite.clone_from(&self.path_rewrite);
        }
        if let Some(ref level) = self.log_level {
            config.log_level.clone_from(level);
        }
        if self.log_file.is_some() {
            config.log_file.clone_from(&self.log_file);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    fn toml_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // =========================================================================
    // Default Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = StyxConfig::default();

        assert_eq!(config.targets, vec!["tcp://127.0.0.1:5640".to_string()]);
        assert_eq!(config.backlog, 5);
        assert_eq!(config.store, StoreKind::Memory);
        assert!(!config.read_only);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.source(), ConfigSource::Default);
        config.validate().unwrap();
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.ends_with("styx/styx.toml"));
        }
    }

    // =========================================================================
    // TOML Parsing Tests
    // =========================================================================

    #[test]
    fn test_parse_valid_toml() {
        let file = toml_file(
            r#"
[listen]
targets = ["tcp://0.0.0.0:564", "file:///run/styx.sock"]
sandbox_root = "/srv/styx"
backlog = 64

[store]
kind = "memory"
read_only = true
path_rewrite = "/exports"

[logging]
level = "debug"
file = "/var/log/styx.log"
"#,
        );

        let config = load_layers(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.sandbox_root, Some(PathBuf::from("/srv/styx")));
        assert_eq!(config.backlog, 64);
        assert!(config.read_only);
        assert_eq!(config.path_rewrite.as_deref(), Some("/exports"));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_file, Some(PathBuf::from("/var/log/styx.log")));
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path, Some(file.path().to_path_buf()));
    }

    #[test]
    fn test_parse_partial_toml() {
        let file = toml_file("[store]\nread_only = true\n");
        let config = load_layers(Some(file.path().to_path_buf()), no_env).unwrap();

        assert!(config.read_only);
        assert_eq!(config.targets, vec![DEFAULT_TARGET.to_string()]);
        assert_eq!(config.backlog, DEFAULT_BACKLOG);
    }

    #[test]
    fn test_unknown_store_kind_in_toml() {
        let file = toml_file("[store]\nkind = \"disk\"\n");
        let err = load_layers(Some(file.path().to_path_buf()), no_env).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = toml_file("[listen\ntargets = ");
        let err = load_layers(Some(file.path().to_path_buf()), no_env).unwrap_err();
        assert!(err.to_string().contains("Failed to parse TOML config"));
    }

    #[test]
    fn test_missing_file_graceful() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = load_layers(Some(dir.path().join("absent.toml")), no_env).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    // =========================================================================
    // Environment Tests
    // =========================================================================

    #[test]
    fn test_env_overrides_file() {
        let file = toml_file("[listen]\nbacklog = 64\n[store]\nread_only = true\n");
        let env = env_of(&[
            ("STYX_LISTEN", "tcp://127.0.0.1:1, ,file:///tmp/s.sock"),
            ("STYX_BACKLOG", "16"),
            ("STYX_READ_ONLY", "false"),
            ("STYX_LOG_LEVEL", "trace"),
        ]);

        let config = load_layers(Some(file.path().to_path_buf()), env).unwrap();

        assert_eq!(
            config.targets,
            vec![
                "tcp://127.0.0.1:1".to_string(),
                "file:///tmp/s.sock".to_string()
            ]
        );
        assert_eq!(config.backlog, 16);
        assert!(!config.read_only);
        assert_eq!(config.log_level, "trace");
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_invalid_env_value_is_error() {
        let err = load_layers(None, env_of(&[("STYX_BACKLOG", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::EnvError { var: "STYX_BACKLOG", .. }));

        let err = load_layers(None, env_of(&[("STYX_BACKLOG", "-1")])).unwrap_err();
        assert!(matches!(err, ConfigError::EnvError { var: "STYX_BACKLOG", .. }));

        let err = load_layers(None, env_of(&[("STYX_STORE", "disk")])).unwrap_err();
        assert!(err.to_string().contains("unknown store kind 'disk'"));
    }

    // =========================================================================
    // Override and Validation Tests
    // =========================================================================

    #[test]
    fn test_cli_overrides_env() {
        let mut config = load_layers(None, env_of(&[("STYX_BACKLOG", "16")])).unwrap();
        ConfigOverrides::new()
            .with_backlog(32)
            .with_targets(vec!["tcp://[::1]:564".to_string()])
            .apply(&mut config);

        assert_eq!(config.backlog, 32);
        assert_eq!(config.targets, vec!["tcp://[::1]:564".to_string()]);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut config = StyxConfig::default();
        ConfigOverrides::new().apply(&mut config);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_validation() {
        let mut config = StyxConfig::default();
        config.targets.clear();
        assert!(config.validate().is_err());

        let mut config = StyxConfig::default();
        config.backlog = 0;
        assert!(config.validate().is_err());

        let mut config = StyxConfig::default();
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = StyxConfig::default();
        config.log_level = "WARN".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn test_derived_options() {
        let mut config = StyxConfig::default();
        config.sandbox_root = Some(PathBuf::from("/srv"));
        config.read_only = true;

        let serve = config.serve_options();
        assert_eq!(serve.classify.sandbox_root, Some(PathBuf::from("/srv")));
        assert_eq!(serve.backlog, DEFAULT_BACKLOG);
        assert!(config.store_options().read_only);
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::Cli.to_string(), "CLI");
        assert_eq!(ConfigSource::Env.to_string(), "environment");
        assert_eq!(ConfigSource::File.to_string(), "config file");
        assert_eq!(ConfigSource::Default.to_string(), "default");
    }
}

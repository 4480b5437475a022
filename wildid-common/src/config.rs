//! Configuration file resolution and TOML loading
//!
//! Config file location follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config directory (`~/.config/wildid/<file>` on Linux)
//! 4. None: caller falls back to built-in defaults
//!
//! A missing file never aborts startup on its own; the loader warns and returns
//! defaults. A file that exists but cannot be read or parsed is a hard error.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Directory name used under the platform config dir
pub const CONFIG_DIR_NAME: &str = "wildid";

/// Logging configuration shared by every wildid binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolves which TOML file (if any) a module should read
#[derive(Debug, Clone)]
pub struct ConfigFileResolver {
    file_name: String,
    env_var: String,
}

impl ConfigFileResolver {
    /// Create resolver for `file_name` (e.g. "wildid.toml") overridable by `env_var`
    pub fn new(file_name: impl Into<String>, env_var: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            env_var: env_var.into(),
        }
    }

    /// Resolve config path with CLI → ENV → user config dir priority
    pub fn resolve(&self, cli_arg: Option<&Path>) -> Option<PathBuf> {
        // Priority 1: Command-line argument
        if let Some(path) = cli_arg {
            return Some(path.to_path_buf());
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(&self.env_var) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        // Priority 3: Platform config directory
        self.default_path().filter(|p| p.exists())
    }

    /// Platform default location, whether or not it exists
    pub fn default_path(&self) -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(&self.file_name))
    }
}

/// Parse a TOML document into `T`
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T> {
    Ok(toml::from_str(content)?)
}

/// Load TOML config from `path`, falling back to `T::default()`
///
/// - `None` path: defaults, logged at info
/// - missing file: defaults, logged at warn
/// - unreadable file: `Error::Io`
/// - parse failure: `Error::Config`
pub fn load_toml_config<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        info!("No config file found, using built-in defaults");
        return Ok(T::default());
    };

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };

    info!("Loading config from {}", path.display());
    parse_toml(&content).map_err(|e| match e {
        Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Resolve a secret with ENV → TOML priority
///
/// Empty or whitespace-only values are ignored. Warns when both sources are set.
pub fn resolve_secret(env_var: &str, toml_value: Option<&str>, label: &str) -> Option<String> {
    let env_value = std::env::var(env_var).ok().filter(|v| is_valid_key(v));
    let toml_value = toml_value.filter(|v| is_valid_key(v)).map(str::to_string);

    if env_value.is_some() && toml_value.is_some() {
        warn!(
            "{} found in both environment ({}) and TOML. Using environment.",
            label, env_var
        );
    }

    if let Some(value) = env_value {
        info!("{} loaded from environment variable", label);
        return Some(value);
    }
    if let Some(value) = toml_value {
        info!("{} loaded from TOML config", label);
        return Some(value);
    }

    warn!("{} not configured", label);
    None
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

//! Configuration file resolution and logging setup
//!
//! Bootstrap configuration is a single TOML file located by priority:
//! 1. Explicit path (command-line argument)
//! 2. Environment variable
//! 3. `<user config dir>/archeo/config.toml`, then `/etc/archeo/config.toml` on Linux
//! 4. None: callers fall back to built-in defaults
//!
//! A missing config file is never fatal. An unreadable or malformed file that was
//! explicitly requested is.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable naming the bootstrap config file
pub const CONFIG_ENV_VAR: &str = "ARCHEO_CONFIG";

/// Application directory name under the platform config/data dirs
const APP_DIR: &str = "archeo";

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level or full filter directive (trace, debug, info, warn, error, `archeo_core=debug`)
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

/// Locate the bootstrap config file
///
/// Returns `None` when no candidate exists; that is the "use defaults" case.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument (returned even if missing so the caller reports it)
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config locations
    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/archeo/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Load a TOML config file, or defaults when `path` is `None`
pub fn load_toml_config<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        info!("No config file found, using built-in defaults");
        return Ok(T::default());
    };

    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config {}: {}", path.display(), e))
    })?;

    let config = toml::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config {}: {}", path.display(), e))
    })?;

    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Default location for persistent data (database, catalogs)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("./archeo_data"))
}

/// Resolve a possibly-relative path against the directory of the config file
pub fn resolve_relative(path: &Path, config_path: Option<&Path>) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match config_path.and_then(|p| p.parent()) {
        Some(base) if !base.as_os_str().is_empty() => base.join(path),
        _ => path.to_path_buf(),
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over the configured level. Fails only if a subscriber is
/// already installed.
pub fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level).unwrap_or_else(|e| {
            warn!("Invalid log level '{}' ({}), using info", logging.level, e);
            EnvFilter::new("info")
        }),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to install tracing subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    fn test_missing_path_gives_defaults() {
        let sample: Sample = load_toml_config(None).unwrap();
        assert_eq!(sample, Sample::default());
        assert_eq!(sample.logging.level, "info");
    }

    #[test]
    fn test_load_toml_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "name = \"giza\"\n[logging]\nlevel = \"debug\"\n").unwrap();

        let sample: Sample = load_toml_config(Some(&path)).unwrap();
        assert_eq!(sample.name.as_deref(), Some("giza"));
        assert_eq!(sample.logging.level, "debug");
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "name = [unterminated").unwrap();

        let result: Result<Sample> = load_toml_config(Some(&path));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_resolve_relative() {
        let config = Path::new("/etc/archeo/config.toml");
        assert_eq!(
            resolve_relative(Path::new("sites.json"), Some(config)),
            PathBuf::from("/etc/archeo/sites.json")
        );
        assert_eq!(
            resolve_relative(Path::new("/data/sites.json"), Some(config)),
            PathBuf::from("/data/sites.json")
        );
        assert_eq!(
            resolve_relative(Path::new("sites.json"), None),
            PathBuf::from("sites.json")
        );
    }
}

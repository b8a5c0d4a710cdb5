//! Analysis configuration
//!
//! One TOML file, located by `archeo_common::config::resolve_config_path`, parsed once at
//! start-up and shared read-only afterwards. Every key is optional.

use crate::connectors::names;
use crate::types::EnvironmentType;
use archeo_common::config::{
    default_data_dir, load_toml_config, resolve_config_path, resolve_relative, LoggingConfig,
    CONFIG_ENV_VAR,
};
use archeo_common::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Default file name of the analysis database inside the data directory
const DEFAULT_DB_FILE: &str = "archeo.db";

/// Per-instrument settings (`[instruments.<name>]`)
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct InstrumentConfig {
    pub enabled: bool,
    /// Overrides `default_instrument_timeout_ms`
    pub timeout_ms: Option<u64>,
    /// Overrides the public service URL
    pub endpoint: Option<String>,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: None,
            endpoint: None,
        }
    }
}

/// Threshold for one instrument in one environment (`[[threshold_overrides]]`)
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ThresholdOverride {
    pub instrument: String,
    pub environment: EnvironmentType,
    pub threshold: f64,
}

/// Process-wide analysis configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    /// SQLite audit database (default: `<data dir>/archeo/archeo.db`)
    pub database_path: Option<PathBuf>,
    /// Known-site catalog (JSON); absent means an empty catalog
    pub known_sites_path: Option<PathBuf>,
    /// Overall bound on one `analyze` call
    pub request_deadline_ms: u64,
    pub default_instrument_timeout_ms: u64,
    /// Acquisition window ending now
    pub time_window_days: u32,
    /// Give up on a locked database after this long
    pub db_max_lock_wait_ms: u64,
    pub logging: LoggingConfig,
    pub instruments: BTreeMap<String, InstrumentConfig>,
    pub threshold_overrides: Vec<ThresholdOverride>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            known_sites_path: None,
            request_deadline_ms: 20_000,
            default_instrument_timeout_ms: 8_000,
            time_window_days: 365,
            db_max_lock_wait_ms: 5_000,
            logging: LoggingConfig::default(),
            instruments: BTreeMap::new(),
            threshold_overrides: Vec::new(),
        }
    }
}

impl AnalysisConfig {
    /// Resolve, read and validate the config file
    ///
    /// Priority: `cli_path` → `ARCHEO_CONFIG` → platform config dir → defaults.
    /// Relative paths inside the file are taken relative to the file itself.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(cli_path, CONFIG_ENV_VAR);
        let mut config: Self = load_toml_config(path.as_deref())?;

        config.database_path = config
            .database_path
            .map(|p| resolve_relative(&p, path.as_deref()));
        config.known_sites_path = config
            .known_sites_path
            .map(|p| resolve_relative(&p, path.as_deref()));

        config.validate()?;
        Ok(config)
    }

    /// Reject values no analysis could run with; warn about names nothing uses
    pub fn validate(&self) -> Result<()> {
        if self.request_deadline_ms == 0 {
            return Err(Error::Config("request_deadline_ms must be > 0".into()));
        }
        if self.default_instrument_timeout_ms == 0 {
            return Err(Error::Config(
                "default_instrument_timeout_ms must be > 0".into(),
            ));
        }
        if self.time_window_days == 0 {
            return Err(Error::Config("time_window_days must be > 0".into()));
        }

        for (name, instrument) in &self.instruments {
            if !names::ALL.contains(&name.as_str()) {
                warn!(instrument = %name, "Configuration for unknown instrument ignored");
            }
            if instrument.timeout_ms == Some(0) {
                return Err(Error::Config(format!(
                    "instruments.{}.timeout_ms must be > 0",
                    name
                )));
            }
        }

        for o in &self.threshold_overrides {
            if !o.threshold.is_finite() || o.threshold <= 0.0 {
                return Err(Error::Config(format!(
                    "threshold override for {} in {} must be a positive number, got {}",
                    o.instrument, o.environment, o.threshold
                )));
            }
            if !names::ALL.contains(&o.instrument.as_str()) {
                warn!(instrument = %o.instrument, "Threshold override for unknown instrument");
            }
        }

        Ok(())
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }

    pub fn default_instrument_timeout(&self) -> Duration {
        Duration::from_millis(self.default_instrument_timeout_ms)
    }

    /// Configured timeout for one instrument, if any
    pub fn instrument_timeout(&self, name: &str) -> Option<Duration> {
        self.instruments
            .get(name)
            .and_then(|i| i.timeout_ms)
            .map(Duration::from_millis)
    }

    /// Endpoint override for one instrument, if any
    pub fn endpoint(&self, name: &str) -> Option<String> {
        self.instruments
            .get(name)
            .and_then(|i| i.endpoint.clone())
            .filter(|e| !e.trim().is_empty())
    }

    /// Instruments are enabled unless switched off explicitly
    pub fn is_enabled(&self, name: &str) -> bool {
        self.instruments.get(name).map_or(true, |i| i.enabled)
    }

    /// Database file, defaulting into the platform data directory
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| default_data_dir().join(DEFAULT_DB_FILE))
    }
}

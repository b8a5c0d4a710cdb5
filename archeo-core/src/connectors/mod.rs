//! Instrument Connectors
//!
//! One `InstrumentConnector` per remote sensing source. Every connector owns its
//! own transport and reports problems as `InstrumentFailure` values, so callers
//! never need error handling of their own.
//!
//! # Connectors
//! 1. **modis** - ORNL DAAC MODIS subsets: `modis_thermal`, `modis_ndvi`, `modis_lai`
//! 2. **opentopodata** - elevation/bathymetry grids: `srtm_elevation`,
//!    `gebco_bathymetry`, `emodnet_bathymetry`
//! 3. **sentinel_hub** - Statistical API: `sentinel2_ndvi`, `sentinel1_sar`
//! 4. **openaltimetry** - ICESat-2 ATL06 tracks: `icesat2_altimetry`
//! 5. **open_meteo** - ERA5 reanalysis: `era5_soil_moisture`
//!
//! The `InstrumentRegistry` holds them behind `Arc<dyn InstrumentConnector>` so the
//! orchestrator never sees a concrete type and tests can substitute stubs.

pub mod http;
pub mod modis;
pub mod open_meteo;
pub mod openaltimetry;
pub mod opentopodata;
pub mod sentinel_hub;
pub mod stats;

use crate::config::AnalysisConfig;
use crate::types::{InstrumentConnector, InstrumentSpec};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Registry keys of the built-in instruments
pub mod names {
    pub const MODIS_THERMAL: &str = "modis_thermal";
    pub const MODIS_NDVI: &str = "modis_ndvi";
    pub const MODIS_LAI: &str = "modis_lai";
    pub const SRTM_ELEVATION: &str = "srtm_elevation";
    pub const GEBCO_BATHYMETRY: &str = "gebco_bathymetry";
    pub const EMODNET_BATHYMETRY: &str = "emodnet_bathymetry";
    pub const SENTINEL2_NDVI: &str = "sentinel2_ndvi";
    pub const SENTINEL1_SAR: &str = "sentinel1_sar";
    pub const ICESAT2_ALTIMETRY: &str = "icesat2_altimetry";
    pub const ERA5_SOIL_MOISTURE: &str = "era5_soil_moisture";

    pub const ALL: [&str; 10] = [
        MODIS_THERMAL,
        MODIS_NDVI,
        MODIS_LAI,
        SRTM_ELEVATION,
        GEBCO_BATHYMETRY,
        EMODNET_BATHYMETRY,
        SENTINEL2_NDVI,
        SENTINEL1_SAR,
        ICESAT2_ALTIMETRY,
        ERA5_SOIL_MOISTURE,
    ];
}

/// Registry construction errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two connectors claim the same name
    #[error("Duplicate instrument: {0}")]
    DuplicateInstrument(String),

    /// HTTP client could not be built
    #[error("HTTP client error for {instrument}: {reason}")]
    Http { instrument: String, reason: String },
}

/// Connectors keyed by unique name, with per-instrument time budgets
///
/// Built once at start-up; read-only afterwards.
pub struct InstrumentRegistry {
    connectors: HashMap<&'static str, Arc<dyn InstrumentConnector>>,
    timeouts: HashMap<&'static str, Duration>,
    default_timeout: Duration,
}

impl std::fmt::Debug for InstrumentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentRegistry")
            .field("instruments", &self.names())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl InstrumentRegistry {
    /// Empty registry
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            connectors: HashMap::new(),
            timeouts: HashMap::new(),
            default_timeout,
        }
    }

    /// Add a connector; names must be unique
    pub fn register(
        &mut self,
        connector: Arc<dyn InstrumentConnector>,
        timeout: Option<Duration>,
    ) -> Result<(), RegistryError> {
        let name = connector.name();
        if self.connectors.contains_key(name) {
            return Err(RegistryError::DuplicateInstrument(name.to_string()));
        }
        if let Some(timeout) = timeout {
            self.timeouts.insert(name, timeout);
        }
        self.connectors.insert(name, connector);
        Ok(())
    }

    /// Builder form of `register`
    pub fn with(
        mut self,
        connector: Arc<dyn InstrumentConnector>,
        timeout: Option<Duration>,
    ) -> Result<Self, RegistryError> {
        self.register(connector, timeout)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn InstrumentConnector>> {
        self.connectors.get(name)
    }

    /// Per-instrument budget, falling back to the registry default
    pub fn timeout_for(&self, name: &str) -> Duration {
        self.timeouts
            .get(name)
            .copied()
            .unwrap_or(self.default_timeout)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.connectors.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Specs of every registered connector, sorted by name
    pub fn specs(&self) -> Vec<&InstrumentSpec> {
        let mut specs: Vec<_> = self.connectors.values().map(|c| c.spec()).collect();
        specs.sort_unstable_by_key(|s| s.name);
        specs
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Build every enabled built-in connector from configuration
    pub fn from_config(config: &AnalysisConfig) -> Result<Self, RegistryError> {
        let mut registry = Self::new(config.default_instrument_timeout());
        let elevation_limiter = Arc::new(opentopodata::public_rate_limiter());

        let connectors: Vec<Arc<dyn InstrumentConnector>> = vec![
            Arc::new(modis::ModisConnector::thermal(config.endpoint(names::MODIS_THERMAL))?),
            Arc::new(modis::ModisConnector::ndvi(config.endpoint(names::MODIS_NDVI))?),
            Arc::new(modis::ModisConnector::lai(config.endpoint(names::MODIS_LAI))?),
            Arc::new(opentopodata::OpenTopoDataConnector::srtm(
                config.endpoint(names::SRTM_ELEVATION),
                Arc::clone(&elevation_limiter),
            )?),
            Arc::new(opentopodata::OpenTopoDataConnector::gebco(
                config.endpoint(names::GEBCO_BATHYMETRY),
                Arc::clone(&elevation_limiter),
            )?),
            Arc::new(opentopodata::OpenTopoDataConnector::emodnet(
                config.endpoint(names::EMODNET_BATHYMETRY),
                Arc::clone(&elevation_limiter),
            )?),
            Arc::new(sentinel_hub::SentinelHubConnector::sentinel2_ndvi(
                config.endpoint(names::SENTINEL2_NDVI),
                sentinel_hub::Credentials::from_env(),
            )?),
            Arc::new(sentinel_hub::SentinelHubConnector::sentinel1_sar(
                config.endpoint(names::SENTINEL1_SAR),
                sentinel_hub::Credentials::from_env(),
            )?),
            Arc::new(openaltimetry::IcesatConnector::new(
                config.endpoint(names::ICESAT2_ALTIMETRY),
            )?),
            Arc::new(open_meteo::SoilMoistureConnector::new(
                config.endpoint(names::ERA5_SOIL_MOISTURE),
            )?),
        ];

        for connector in connectors {
            let name = connector.name();
            if !config.is_enabled(name) {
                info!(instrument = name, "Instrument disabled by configuration");
                continue;
            }
            registry.register(connector, config.instrument_timeout(name))?;
        }

        info!(
            instruments = registry.len(),
            "Instrument registry initialized"
        );
        Ok(registry)
    }
}

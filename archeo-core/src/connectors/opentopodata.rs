//! Elevation and bathymetry grids via OpenTopoData
//!
//! One connector type serves three datasets:
//! - `srtm_elevation`: SRTM 30 m land elevation
//! - `gebco_bathymetry`: GEBCO global seafloor
//! - `emodnet_bathymetry`: EMODnet European seafloor (high resolution)
//!
//! The box is sampled on a regular grid; the scalar is the standard deviation of
//! the residuals after removing the best-fit plane, i.e. local relief in metres.
//! The public service allows one request per second, shared across datasets.

use super::{http, names, stats, RegistryError};
use crate::types::{
    BoundingBox, InstrumentConnector, InstrumentMeasurement, InstrumentOutcome, InstrumentSpec,
    ThresholdSense, TimeWindow,
};
use archeo_common::geo::{meters_per_deg_lon, METERS_PER_DEG_LAT};
use async_trait::async_trait;
use serde::Deserialize;
use governor::Quota;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::debug;

const OPENTOPODATA_BASE_URL: &str = "https://api.opentopodata.org";

/// Points per side of the sample grid (49 locations, under the 100 per-call cap)
const GRID_SIDE: usize = 7;

/// Fraction of usable points below which a result is reported as degraded
const MIN_VALID_FRACTION: f64 = 0.5;

/// Request pacing shared by every connector that talks to the same service
pub type RateLimiter = governor::RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Limiter for the public API: 1 request per second
pub fn public_rate_limiter() -> RateLimiter {
    RateLimiter::direct(Quota::per_second(NonZeroU32::MIN))
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    results: Vec<LookupResult>,
}

#[derive(Debug, Deserialize)]
struct LookupResult {
    elevation: Option<f64>,
}

/// Which samples count toward the relief estimate
#[derive(Debug, Clone, Copy, PartialEq)]
enum Surface {
    Land,
    /// Only points below sea level
    Seafloor,
}

/// OpenTopoData dataset connector
pub struct OpenTopoDataConnector {
    spec: InstrumentSpec,
    dataset: &'static str,
    surface: Surface,
    base_url: String,
    http_client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
}

impl OpenTopoDataConnector {
    fn build(
        spec: InstrumentSpec,
        dataset: &'static str,
        surface: Surface,
        endpoint: Option<String>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            http_client: http::build_client(spec.name)?,
            base_url: endpoint.unwrap_or_else(|| OPENTOPODATA_BASE_URL.to_string()),
            spec,
            dataset,
            surface,
            rate_limiter,
        })
    }

    /// SRTM land relief
    pub fn srtm(
        endpoint: Option<String>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, RegistryError> {
        Self::build(
            InstrumentSpec {
                name: names::SRTM_ELEVATION,
                display_name: "SRTM Elevation",
                kind: "elevation_relief",
                unit: "m",
                default_threshold: 2.0,
                sense: ThresholdSense::Above,
                environment_sensitive: true,
            },
            "srtm30m",
            Surface::Land,
            endpoint,
            rate_limiter,
        )
    }

    /// GEBCO seafloor relief
    pub fn gebco(
        endpoint: Option<String>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, RegistryError> {
        Self::build(
            InstrumentSpec {
                name: names::GEBCO_BATHYMETRY,
                display_name: "GEBCO Bathymetry",
                kind: "seafloor_relief",
                unit: "m",
                default_threshold: 15.0,
                sense: ThresholdSense::Above,
                environment_sensitive: true,
            },
            "gebco2020",
            Surface::Seafloor,
            endpoint,
            rate_limiter,
        )
    }

    /// EMODnet seafloor relief; European waters only
    pub fn emodnet(
        endpoint: Option<String>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, RegistryError> {
        Self::build(
            InstrumentSpec {
                name: names::EMODNET_BATHYMETRY,
                display_name: "EMODnet Bathymetry",
                kind: "seafloor_relief",
                unit: "m",
                default_threshold: 3.0,
                sense: ThresholdSense::Above,
                environment_sensitive: false,
            },
            "emod2018",
            Surface::Seafloor,
            endpoint,
            rate_limiter,
        )
    }

    fn lookup_url(&self, points: &[(f64, f64)]) -> String {
        let locations: Vec<String> = points
            .iter()
            .map(|(lat, lon)| format!("{:.6},{:.6}", lat, lon))
            .collect();
        format!(
            "{}/v1/{}?locations={}",
            self.base_url.trim_end_matches('/'),
            self.dataset,
            locations.join("|")
        )
    }

    /// Residual relief over the sampled grid
    fn reduce(
        &self,
        bbox: &BoundingBox,
        points: &[(f64, f64)],
        elevations: &[Option<f64>],
    ) -> InstrumentOutcome {
        let name = self.spec.name;
        let (lat0, lon0) = bbox.center();
        let m_per_deg_lon = meters_per_deg_lon(lat0);

        let usable: Vec<Option<f64>> = elevations
            .iter()
            .map(|e| match self.surface {
                Surface::Land => *e,
                Surface::Seafloor => e.filter(|z| *z < 0.0),
            })
            .collect();

        let samples: Vec<(f64, f64, f64)> = points
            .iter()
            .zip(&usable)
            .filter_map(|(&(lat, lon), z)| {
                z.map(|z| {
                    (
                        (lon - lon0) * m_per_deg_lon,
                        (lat - lat0) * METERS_PER_DEG_LAT,
                        z,
                    )
                })
            })
            .collect();

        let Some(relief) = stats::detrended_std(&samples) else {
            let reason = match self.surface {
                Surface::Land => "No elevation samples in area",
                Surface::Seafloor => "No seafloor samples in area",
            };
            return Err(http::no_data(name, reason));
        };

        let valid = stats::valid_fraction(&usable);
        let note = format!(
            "{} of {} grid points, plane-detrended",
            samples.len(),
            points.len()
        );
        let measurement = InstrumentMeasurement::observed(
            &self.spec,
            relief,
            format!("OpenTopoData {}", self.dataset),
            note,
        );

        if valid < MIN_VALID_FRACTION {
            Ok(measurement.degraded())
        } else {
            Ok(measurement)
        }
    }
}

#[async_trait]
impl InstrumentConnector for OpenTopoDataConnector {
    fn spec(&self) -> &InstrumentSpec {
        &self.spec
    }

    async fn measure(&self, bbox: &BoundingBox, _window: &TimeWindow) -> InstrumentOutcome {
        let points = bbox.grid(GRID_SIDE);
        let url = self.lookup_url(&points);

        self.rate_limiter.until_ready().await;
        debug!(
            instrument = self.spec.name,
            points = points.len(),
            "Requesting OpenTopoData grid"
        );

        let response: LookupResponse =
            http::fetch_json(self.spec.name, self.http_client.get(&url)).await?;

        if response.status.as_deref().is_some_and(|s| s != "OK") {
            let reason = response
                .error
                .unwrap_or_else(|| "Service reported an error".to_string());
            return Err(http::parse_failure(self.spec.name, reason));
        }
        if response.results.len() != points.len() {
            return Err(http::parse_failure(
                self.spec.name,
                format!(
                    "expected {} results, got {}",
                    points.len(),
                    response.results.len()
                ),
            ));
        }

        let elevations: Vec<Option<f64>> = response.results.iter().map(|r| r.elevation).collect();
        self.reduce(bbox, &points, &elevations)
    }
}

//! ERA5 surface soil moisture via the Open-Meteo historical archive
//!
//! Buried walls and compacted floors drain differently from the surrounding soil.
//! The scalar is the ratio of mean top-layer soil moisture at the box centre to
//! the mean at four surrounding points one reanalysis cell away. The instrument
//! is anomalous when the ratio drops *below* its threshold.

use super::{http, names, stats, RegistryError};
use crate::types::{
    BoundingBox, InstrumentConnector, InstrumentMeasurement, InstrumentOutcome, InstrumentSpec,
    ThresholdSense, TimeWindow,
};
use archeo_common::geo::clamp_to_rect;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::debug;

const OPEN_METEO_ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";

const VARIABLE: &str = "soil_moisture_0_to_7cm";

/// ERA5 grid spacing in degrees
const ERA5_CELL_DEG: f64 = 0.25;

/// Hourly series longer than this are trimmed to the most recent part
const MAX_WINDOW_DAYS: i64 = 90;

/// Fraction of valid centre hours below which the result is reported as degraded
const MIN_VALID_FRACTION: f64 = 0.5;

/// Single-location requests return an object, multi-location an array
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ArchiveResponse {
    Many(Vec<LocationSeries>),
    One(LocationSeries),
}

impl ArchiveResponse {
    fn into_vec(self) -> Vec<LocationSeries> {
        match self {
            Self::Many(series) => series,
            Self::One(series) => vec![series],
        }
    }
}

#[derive(Debug, Deserialize)]
struct LocationSeries {
    #[serde(default)]
    hourly: Option<HourlySeries>,
}

#[derive(Debug, Default, Deserialize)]
struct HourlySeries {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default, rename = "soil_moisture_0_to_7cm")]
    soil_moisture: Vec<Option<f64>>,
}

/// ERA5 soil moisture contrast connector
pub struct SoilMoistureConnector {
    spec: InstrumentSpec,
    base_url: String,
    http_client: reqwest::Client,
}

impl SoilMoistureConnector {
    pub fn new(endpoint: Option<String>) -> Result<Self, RegistryError> {
        let spec = InstrumentSpec {
            name: names::ERA5_SOIL_MOISTURE,
            display_name: "ERA5 Soil Moisture",
            kind: "soil_moisture_ratio",
            unit: "ratio",
            default_threshold: 0.85,
            sense: ThresholdSense::Below,
            environment_sensitive: false,
        };
        Ok(Self {
            http_client: http::build_client(spec.name)?,
            base_url: endpoint.unwrap_or_else(|| OPEN_METEO_ARCHIVE_URL.to_string()),
            spec,
        })
    }

    /// Centre first, then north, south, east, west
    fn sample_points(bbox: &BoundingBox) -> Vec<(f64, f64)> {
        let (lat, lon) = bbox.center();
        let reach_lat = ((bbox.lat_max - bbox.lat_min) / 2.0).max(ERA5_CELL_DEG);
        let reach_lon = ((bbox.lon_max - bbox.lon_min) / 2.0).max(ERA5_CELL_DEG);
        [
            (lat, lon),
            (lat + reach_lat, lon),
            (lat - reach_lat, lon),
            (lat, lon + reach_lon),
            (lat, lon - reach_lon),
        ]
        .into_iter()
        .map(|(la, lo)| clamp_to_rect(la, lo, -90.0, 90.0, -180.0, 180.0))
        .collect()
    }

    fn archive_url(&self, bbox: &BoundingBox, window: &TimeWindow) -> String {
        let points = Self::sample_points(bbox);
        let join = |pick: fn(&(f64, f64)) -> f64| {
            points
                .iter()
                .map(|p| format!("{:.4}", pick(p)))
                .collect::<Vec<_>>()
                .join(",")
        };
        let start = window.start.max(window.end - Duration::days(MAX_WINDOW_DAYS));
        format!(
            "{}?latitude={}&longitude={}&start_date={}&end_date={}&hourly={}&models=era5",
            self.base_url,
            join(|p: &(f64, f64)| p.0),
            join(|p: &(f64, f64)| p.1),
            start.format("%Y-%m-%d"),
            window.end_date(),
            VARIABLE
        )
    }

    fn reduce(&self, locations: Vec<LocationSeries>) -> InstrumentOutcome {
        let name = self.spec.name;
        let mut series = locations
            .into_iter()
            .map(|loc| loc.hourly.unwrap_or_default());

        let Some(centre) = series.next() else {
            return Err(http::no_data(name, "Archive returned no locations"));
        };
        let centre_values: Vec<f64> = centre.soil_moisture.iter().flatten().copied().collect();
        let ring_values: Vec<f64> = series
            .flat_map(|s| s.soil_moisture.into_iter().flatten())
            .collect();

        let (Some(centre_mean), Some(ring_mean)) =
            (stats::mean(&centre_values), stats::mean(&ring_values))
        else {
            return Err(http::no_data(name, "No soil moisture values in window"));
        };
        if ring_mean <= 0.0 {
            return Err(http::no_data(name, "Surrounding soil moisture is zero"));
        }

        let ratio = centre_mean / ring_mean;
        let valid = stats::valid_fraction(&centre.soil_moisture);
        let acquired = centre
            .time
            .iter()
            .zip(&centre.soil_moisture)
            .filter(|(_, v)| v.is_some())
            .filter_map(|(t, _)| NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M").ok())
            .max()
            .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc));

        let note = format!(
            "centre {:.3} vs surroundings {:.3} m3/m3",
            centre_mean, ring_mean
        );
        let measurement =
            InstrumentMeasurement::observed(&self.spec, ratio, "Open-Meteo ERA5 archive", note)
                .acquired(acquired);

        if valid < MIN_VALID_FRACTION {
            Ok(measurement.degraded())
        } else {
            Ok(measurement)
        }
    }
}

#[async_trait]
impl InstrumentConnector for SoilMoistureConnector {
    fn spec(&self) -> &InstrumentSpec {
        &self.spec
    }

    async fn measure(&self, bbox: &BoundingBox, window: &TimeWindow) -> InstrumentOutcome {
        let url = self.archive_url(bbox, window);
        debug!(instrument = self.spec.name, url = %url, "Requesting ERA5 soil moisture");

        let response: ArchiveResponse =
            http::fetch_json(self.spec.name, self.http_client.get(&url)).await?;
        self.reduce(response.into_vec())
    }
}

//! ICESat-2 ATL06 land-ice heights via OpenAltimetry
//!
//! Two calls: list the reference ground tracks crossing the box in the window,
//! then fetch ATL06 photon-segment heights for the most recent track. The scalar
//! is the standard deviation of along-track height residuals after removing a
//! linear trend in latitude.

use super::{http, names, stats, RegistryError};
use crate::types::{
    BoundingBox, InstrumentConnector, InstrumentMeasurement, InstrumentOutcome, InstrumentSpec,
    ThresholdSense, TimeWindow,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::debug;

const OPENALTIMETRY_BASE_URL: &str =
    "https://openaltimetry.earthdatacloud.nasa.gov/data/api/icesat2";

/// Segments needed for a meaningful residual
const MIN_SEGMENTS: usize = 10;

/// Segments below which the result is reported as degraded
const GOOD_SEGMENTS: usize = 50;

/// ATL06 fill value for missing heights
const FILL_HEIGHT: f64 = 3.0e38;

#[derive(Debug, Deserialize)]
struct TrackListing {
    #[serde(default)]
    track: Vec<TrackEntry>,
}

#[derive(Debug, Deserialize)]
struct TrackEntry {
    #[serde(default)]
    track: Option<u32>,
    #[serde(default)]
    date: Option<String>,
}

/// One beam's series; only the heights matter here
#[derive(Debug, Deserialize)]
struct BeamSeries {
    #[serde(default)]
    series: Vec<SeriesPart>,
}

#[derive(Debug, Deserialize)]
struct SeriesPart {
    /// `[lat, lon, height]` triples; extra columns are ignored
    #[serde(default)]
    data: Vec<Vec<Option<f64>>>,
}

/// ICESat-2 altimetry connector
pub struct IcesatConnector {
    spec: InstrumentSpec,
    base_url: String,
    http_client: reqwest::Client,
}

impl IcesatConnector {
    pub fn new(endpoint: Option<String>) -> Result<Self, RegistryError> {
        let spec = InstrumentSpec {
            name: names::ICESAT2_ALTIMETRY,
            display_name: "ICESat-2 Altimetry",
            kind: "surface_roughness",
            unit: "m",
            default_threshold: 0.8,
            sense: ThresholdSense::Above,
            environment_sensitive: true,
        };
        Ok(Self {
            http_client: http::build_client(spec.name)?,
            base_url: endpoint
                .unwrap_or_else(|| OPENALTIMETRY_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            spec,
        })
    }

    fn bounds_query(bbox: &BoundingBox) -> String {
        format!(
            "minx={:.5}&miny={:.5}&maxx={:.5}&maxy={:.5}",
            bbox.lon_min, bbox.lat_min, bbox.lon_max, bbox.lat_max
        )
    }

    fn tracks_url(&self, bbox: &BoundingBox, window: &TimeWindow) -> String {
        format!(
            "{}/getTracks/?{}&startDate={}&endDate={}&outputFormat=json",
            self.base_url,
            Self::bounds_query(bbox),
            window.start_date(),
            window.end_date()
        )
    }

    fn atl06_url(&self, bbox: &BoundingBox, track: u32, date: &str) -> String {
        format!(
            "{}/atl06/?{}&date={}&trackId={}&outputFormat=json",
            self.base_url,
            Self::bounds_query(bbox),
            date,
            track
        )
    }

    /// Most recent (track, date) pair, ties broken by lowest track id
    fn latest_track(listing: &TrackListing) -> Option<(u32, NaiveDate)> {
        listing
            .track
            .iter()
            .filter_map(|entry| {
                let date = NaiveDate::parse_from_str(entry.date.as_deref()?, "%Y-%m-%d").ok()?;
                Some((entry.track?, date))
            })
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
    }

    fn reduce(&self, beams: &[BeamSeries], date: NaiveDate) -> InstrumentOutcome {
        let name = self.spec.name;
        let mut residuals = Vec::new();
        let mut total = 0usize;

        // Detrend each beam separately; beams sit at different elevations
        for beam in beams {
            let points: Vec<(f64, f64, f64)> = beam
                .series
                .iter()
                .flat_map(|part| part.data.iter())
                .filter_map(|row| {
                    total += 1;
                    let lat = (*row.first()?)?;
                    let lon = (*row.get(1)?)?;
                    let h = (*row.get(2)?)?;
                    (h.is_finite() && h.abs() < FILL_HEIGHT).then_some((lat, lon, h))
                })
                .collect();
            if points.len() < 3 {
                continue;
            }
            residuals.extend(along_track_residuals(&points));
        }

        if residuals.len() < MIN_SEGMENTS {
            return Err(http::no_data(
                name,
                format!("{} usable ATL06 segments", residuals.len()),
            ));
        }

        let roughness = stats::std_dev(&residuals).unwrap_or(0.0);
        let note = format!("{} of {} segments on {}", residuals.len(), total, date);
        let acquired = date
            .and_hms_opt(0, 0, 0)
            .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc));
        let measurement =
            InstrumentMeasurement::observed(&self.spec, roughness, "OpenAltimetry ATL06", note)
                .acquired(acquired);

        if residuals.len() < GOOD_SEGMENTS {
            Ok(measurement.degraded())
        } else {
            Ok(measurement)
        }
    }
}

/// Height residuals after a least-squares line in latitude
fn along_track_residuals(points: &[(f64, f64, f64)]) -> Vec<f64> {
    let n = points.len() as f64;
    let mean_lat = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_h = points.iter().map(|p| p.2).sum::<f64>() / n;
    let (mut sxx, mut sxy) = (0.0, 0.0);
    for &(lat, _, h) in points {
        sxx += (lat - mean_lat).powi(2);
        sxy += (lat - mean_lat) * (h - mean_h);
    }
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    points
        .iter()
        .map(|&(lat, _, h)| h - (mean_h + slope * (lat - mean_lat)))
        .collect()
}

#[async_trait]
impl InstrumentConnector for IcesatConnector {
    fn spec(&self) -> &InstrumentSpec {
        &self.spec
    }

    async fn measure(&self, bbox: &BoundingBox, window: &TimeWindow) -> InstrumentOutcome {
        let name = self.spec.name;
        let listing: TrackListing =
            http::fetch_json(name, self.http_client.get(self.tracks_url(bbox, window))).await?;

        let Some((track, date)) = Self::latest_track(&listing) else {
            return Err(http::no_data(name, "No ICESat-2 tracks cross the area in window"));
        };
        debug!(instrument = name, track, %date, "Fetching ATL06 segments");

        let url = self.atl06_url(bbox, track, &date.format("%Y-%m-%d").to_string());
        let beams: Vec<BeamSeries> = http::fetch_json(name, self.http_client.get(url)).await?;
        self.reduce(&beams, date)
    }
}

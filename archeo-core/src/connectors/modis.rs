//! MODIS land products via the ORNL DAAC subset service
//!
//! Three instruments share this connector, one per product:
//! - `modis_thermal`: MOD11A2 daytime land surface temperature (8-day)
//! - `modis_ndvi`: MOD13Q1 NDVI (16-day)
//! - `modis_lai`: MCD15A3H leaf area index (4-day)
//!
//! The scalar is the centre-versus-surroundings contrast of the product grid,
//! averaged over every composite in the window.

use super::{http, names, stats, RegistryError};
use crate::types::{
    BoundingBox, InstrumentConnector, InstrumentMeasurement, InstrumentOutcome, InstrumentSpec,
    ThresholdSense, TimeWindow,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use tracing::debug;

const ORNL_BASE_URL: &str = "https://modis.ornl.gov/rst/api/v1";

/// The service rejects subsets larger than 100 km either side of the centre
const MAX_KM_EXTENT: u32 = 100;

/// Fraction of valid pixels below which a result is reported as degraded
const MIN_VALID_FRACTION: f64 = 0.5;

/// Product-specific decoding rules
#[derive(Debug, Clone, Copy)]
struct Product {
    code: &'static str,
    band: &'static str,
    /// Used when the response carries no scale factor
    default_scale: f64,
    /// Raw digital number range outside which a pixel is fill
    valid_min: f64,
    valid_max: f64,
    /// Ten composites fit in one request
    max_window_days: i64,
}

const THERMAL: Product = Product {
    code: "MOD11A2",
    band: "LST_Day_1km",
    default_scale: 0.02,
    valid_min: 7500.0,
    valid_max: 65535.0,
    max_window_days: 72,
};

const NDVI: Product = Product {
    code: "MOD13Q1",
    band: "250m_16_days_NDVI",
    default_scale: 0.0001,
    valid_min: -2000.0,
    valid_max: 10000.0,
    max_window_days: 144,
};

const LAI: Product = Product {
    code: "MCD15A3H",
    band: "Lai_500m",
    default_scale: 0.1,
    valid_min: 0.0,
    valid_max: 100.0,
    max_window_days: 36,
};

/// Subset response from the ORNL service
#[derive(Debug, Deserialize)]
struct SubsetResponse {
    #[serde(default)]
    nrows: Option<usize>,
    #[serde(default)]
    ncols: Option<usize>,
    /// Sent as a string by the live service
    #[serde(default)]
    scale: Option<serde_json::Value>,
    #[serde(default)]
    subset: Vec<SubsetEntry>,
}

#[derive(Debug, Deserialize)]
struct SubsetEntry {
    #[serde(default)]
    calendar_date: Option<String>,
    #[serde(default)]
    data: Vec<Option<f64>>,
}

/// ORNL DAAC MODIS connector
pub struct ModisConnector {
    spec: InstrumentSpec,
    product: Product,
    base_url: String,
    http_client: reqwest::Client,
}

impl ModisConnector {
    fn build(
        spec: InstrumentSpec,
        product: Product,
        endpoint: Option<String>,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            http_client: http::build_client(spec.name)?,
            base_url: endpoint.unwrap_or_else(|| ORNL_BASE_URL.to_string()),
            spec,
            product,
        })
    }

    /// Daytime land surface temperature contrast (K)
    pub fn thermal(endpoint: Option<String>) -> Result<Self, RegistryError> {
        Self::build(
            InstrumentSpec {
                name: names::MODIS_THERMAL,
                display_name: "MODIS Thermal",
                kind: "thermal_contrast",
                unit: "K",
                default_threshold: 1.5,
                sense: ThresholdSense::Above,
                environment_sensitive: true,
            },
            THERMAL,
            endpoint,
        )
    }

    /// Vegetation index contrast (unitless)
    pub fn ndvi(endpoint: Option<String>) -> Result<Self, RegistryError> {
        Self::build(
            InstrumentSpec {
                name: names::MODIS_NDVI,
                display_name: "MODIS NDVI",
                kind: "vegetation_contrast",
                unit: "ndvi",
                default_threshold: 0.08,
                sense: ThresholdSense::Above,
                environment_sensitive: true,
            },
            NDVI,
            endpoint,
        )
    }

    /// Leaf area index contrast (m²/m²)
    pub fn lai(endpoint: Option<String>) -> Result<Self, RegistryError> {
        Self::build(
            InstrumentSpec {
                name: names::MODIS_LAI,
                display_name: "MODIS LAI",
                kind: "canopy_contrast",
                unit: "m2/m2",
                default_threshold: 0.6,
                sense: ThresholdSense::Above,
                environment_sensitive: true,
            },
            LAI,
            endpoint,
        )
    }

    fn subset_url(&self, bbox: &BoundingBox, window: &TimeWindow) -> String {
        let (lat, lon) = bbox.center();
        let (km_above_below, km_left_right) = km_extents(bbox);
        let (start, end) = clamp_window(window, self.product.max_window_days);
        format!(
            "{}/{}/subset?latitude={:.5}&longitude={:.5}&band={}&startDate={}&endDate={}&kmAboveBelow={}&kmLeftRight={}",
            self.base_url.trim_end_matches('/'),
            self.product.code,
            lat,
            lon,
            self.product.band,
            modis_date(start),
            modis_date(end),
            km_above_below,
            km_left_right,
        )
    }

    fn reduce(&self, response: SubsetResponse) -> InstrumentOutcome {
        let name = self.spec.name;
        let scale = parse_scale(response.scale.as_ref()).unwrap_or(self.product.default_scale);

        let mut contrasts = Vec::new();
        let mut pixels: Vec<Option<f64>> = Vec::new();
        let mut latest: Option<NaiveDate> = None;

        for entry in &response.subset {
            let grid: Vec<Option<f64>> = entry
                .data
                .iter()
                .map(|raw| {
                    raw.filter(|v| *v >= self.product.valid_min && *v <= self.product.valid_max)
                        .map(|v| v * scale)
                })
                .collect();

            let ncols = response
                .ncols
                .filter(|c| *c > 0)
                .unwrap_or_else(|| (grid.len() as f64).sqrt().round() as usize);
            let shape_ok = grid.len() >= ncols
                && grid.len() % ncols == 0
                && response
                    .nrows
                    .map_or(true, |r| r.checked_mul(ncols) == Some(grid.len()));
            if !shape_ok {
                debug!(
                    instrument = name,
                    cells = grid.len(),
                    ncols,
                    "Skipping composite with inconsistent shape"
                );
                continue;
            }

            let core = (ncols / 3).max(1) | 1;
            if let Some(contrast) = stats::center_contrast(&grid, ncols, core) {
                contrasts.push(contrast);
                if let Some(date) = entry
                    .calendar_date
                    .as_deref()
                    .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                {
                    latest = latest.max(Some(date));
                }
            }
            pixels.extend(grid);
        }

        let Some(value) = stats::mean(&contrasts) else {
            return Err(http::no_data(name, "No composite with valid pixels in window"));
        };

        let valid = stats::valid_fraction(&pixels);
        let note = format!(
            "{} composites, {:.0}% valid pixels",
            contrasts.len(),
            valid * 100.0
        );
        let acquired = latest
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc));

        let source = format!("ORNL DAAC {}", self.product.code);
        let measurement =
            InstrumentMeasurement::observed(&self.spec, value, source, note).acquired(acquired);

        if valid < MIN_VALID_FRACTION {
            Ok(measurement.degraded())
        } else {
            Ok(measurement)
        }
    }
}

#[async_trait]
impl InstrumentConnector for ModisConnector {
    fn spec(&self) -> &InstrumentSpec {
        &self.spec
    }

    async fn measure(&self, bbox: &BoundingBox, window: &TimeWindow) -> InstrumentOutcome {
        let url = self.subset_url(bbox, window);
        debug!(instrument = self.spec.name, url = %url, "Requesting MODIS subset");

        let request = self
            .http_client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json");
        let response: SubsetResponse = http::fetch_json(self.spec.name, request).await?;

        if response.subset.is_empty() {
            return Err(http::no_data(self.spec.name, "Subset contained no composites"));
        }
        self.reduce(response)
    }
}

/// Half-extents in whole km, at least 1
fn km_extents(bbox: &BoundingBox) -> (u32, u32) {
    let half = |m: f64| ((m / 2000.0).ceil() as u32).clamp(1, MAX_KM_EXTENT);
    (half(bbox.height_m()), half(bbox.width_m()))
}

/// Keep only the most recent `max_days` of the window
fn clamp_window(window: &TimeWindow, max_days: i64) -> (DateTime<Utc>, DateTime<Utc>) {
    let earliest = window.end - Duration::days(max_days);
    (window.start.max(earliest), window.end)
}

/// `AYYYYDDD` day-of-year form used by the service
fn modis_date(at: DateTime<Utc>) -> String {
    at.format("A%Y%j").to_string()
}

fn parse_scale(value: Option<&serde_json::Value>) -> Option<f64> {
    let scale = match value? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    (scale > 0.0).then_some(scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MeasurementMode;
    use chrono::TimeZone;

    fn window() -> TimeWindow {
        TimeWindow::last_days(365, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_subset_url_shape() {
        let connector = ModisConnector::thermal(Some("http://localhost:9/api/".into())).unwrap();
        let bbox = BoundingBox::new(29.97, 29.99, 31.12, 31.14).unwrap();
        let url = connector.subset_url(&bbox, &window());

        assert!(url.starts_with("http://localhost:9/api/MOD11A2/subset?"));
        assert!(url.contains("band=LST_Day_1km"));
        assert!(url.contains("latitude=29.98000"));
        assert!(url.contains("endDate=A2024061"));
        // 365-day window clamped to 72 days
        assert!(url.contains("startDate=A2023354"));
        assert!(url.contains("kmAboveBelow=2"));
    }

    #[test]
    fn test_reduce_hot_centre_with_fill_values() {
        let connector = ModisConnector::thermal(None).unwrap();
        // 3x3 grid in raw DN; centre 15200 * 0.02 = 304 K, ring 15000 * 0.02 = 300 K
        let data = vec![
            Some(15000.0), Some(15000.0), Some(0.0),
            Some(15000.0), Some(15200.0), Some(15000.0),
            Some(15000.0), None, Some(15000.0),
        ];
        let response = SubsetResponse {
            nrows: Some(3),
            ncols: Some(3),
            scale: Some(serde_json::json!("0.02")),
            subset: vec![SubsetEntry {
                calendar_date: Some("2024-02-18".into()),
                data,
            }],
        };

        let m = connector.reduce(response).unwrap();
        assert!((m.value - 4.0).abs() < 1e-9, "value {}", m.value);
        assert_eq!(m.unit, "K");
        assert_eq!(m.mode, MeasurementMode::Real);
        assert_eq!(
            m.acquired_at,
            Some(Utc.with_ymd_and_hms(2024, 2, 18, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_reduce_mostly_fill_is_degraded() {
        let connector = ModisConnector::ndvi(None).unwrap();
        let mut data = vec![Some(-3000.0); 9];
        data[4] = Some(6000.0);
        data[0] = Some(5000.0);
        let response = SubsetResponse {
            nrows: Some(3),
            ncols: Some(3),
            scale: None,
            subset: vec![SubsetEntry {
                calendar_date: None,
                data,
            }],
        };
        let m = connector.reduce(response).unwrap();
        assert_eq!(m.mode, MeasurementMode::Degraded);
        assert!((m.value - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_reduce_all_fill_is_no_data() {
        let connector = ModisConnector::lai(None).unwrap();
        let response = SubsetResponse {
            nrows: Some(2),
            ncols: Some(2),
            scale: None,
            subset: vec![SubsetEntry {
                calendar_date: None,
                data: vec![Some(255.0); 4],
            }],
        };
        let failure = connector.reduce(response).unwrap_err();
        assert_eq!(failure.kind, crate::types::FailureKind::NoData);
    }

    fn lst_entry(data: Vec<Option<f64>>) -> SubsetEntry {
        SubsetEntry {
            calendar_date: Some("2024-02-18".into()),
            data,
        }
    }

    #[test]
    fn test_short_grid_without_nrows_is_no_data() {
        let connector = ModisConnector::thermal(None).unwrap();
        let response = SubsetResponse {
            nrows: None,
            ncols: Some(3),
            scale: None,
            subset: vec![lst_entry(vec![Some(15000.0)])],
        };
        let failure = connector.reduce(response).unwrap_err();
        assert_eq!(failure.kind, crate::types::FailureKind::NoData);
    }

    #[test]
    fn test_ragged_grid_is_skipped() {
        let connector = ModisConnector::thermal(None).unwrap();
        let ragged = SubsetResponse {
            nrows: None,
            ncols: Some(3),
            scale: None,
            subset: vec![lst_entry(vec![Some(15000.0); 7])],
        };
        let failure = connector.reduce(ragged).unwrap_err();
        assert_eq!(failure.kind, crate::types::FailureKind::NoData);

        // A well-formed composite next to a ragged one still yields a value
        let mut good = vec![Some(15000.0); 9];
        good[4] = Some(15100.0);
        let mixed = SubsetResponse {
            nrows: None,
            ncols: Some(3),
            scale: Some(serde_json::json!(0.02)),
            subset: vec![lst_entry(vec![Some(15000.0); 7]), lst_entry(good)],
        };
        let m = connector.reduce(mixed).unwrap();
        assert!((m.value - 2.0).abs() < 1e-9, "value {}", m.value);
    }

    #[test]
    fn test_parse_scale_variants() {
        assert_eq!(parse_scale(Some(&serde_json::json!("0.1"))), Some(0.1));
        assert_eq!(parse_scale(Some(&serde_json::json!(0.02))), Some(0.02));
        assert_eq!(parse_scale(Some(&serde_json::json!("n/a"))), None);
        assert_eq!(parse_scale(Some(&serde_json::json!(0))), None);
        assert_eq!(parse_scale(None), None);
    }
}

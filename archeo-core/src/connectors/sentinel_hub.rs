//! Sentinel-1/Sentinel-2 statistics via the Sentinel Hub Statistical API
//!
//! - `sentinel2_ndvi`: spatial spread (stDev) of Sentinel-2 L2A NDVI
//! - `sentinel1_sar`: spatial spread of Sentinel-1 GRD VV backscatter in dB
//!
//! Each 30-day interval in the window is aggregated server-side; the scalar is
//! the mean of the per-interval standard deviations. Requires OAuth client
//! credentials; without them the connector reports `auth_error` immediately.

use super::{http, names, stats, RegistryError};
use crate::types::{
    BoundingBox, FailureKind, InstrumentConnector, InstrumentFailure, InstrumentMeasurement,
    InstrumentOutcome, InstrumentSpec, ThresholdSense, TimeWindow,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

const SENTINEL_HUB_BASE_URL: &str = "https://services.sentinel-hub.com";
const TOKEN_PATH: &str = "/auth/realms/main/protocol/openid-connect/token";
const STATISTICS_PATH: &str = "/api/v1/statistics";

pub const CLIENT_ID_ENV: &str = "ARCHEO_SENTINEL_HUB_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "ARCHEO_SENTINEL_HUB_CLIENT_SECRET";

/// Refresh tokens this long before they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Share of no-data pixels above which a result is reported as degraded
const MAX_NO_DATA_RATIO: f64 = 0.5;

const S2_NDVI_EVALSCRIPT: &str = r#"//VERSION=3
function setup() {
  return {
    input: [{ bands: ["B04", "B08", "SCL", "dataMask"] }],
    output: [
      { id: "ndvi", bands: 1, sampleType: "FLOAT32" },
      { id: "dataMask", bands: 1 }
    ]
  };
}
function evaluatePixel(s) {
  var cloud = s.SCL == 3 || s.SCL == 8 || s.SCL == 9 || s.SCL == 10;
  var ndvi = (s.B08 - s.B04) / (s.B08 + s.B04);
  return { ndvi: [ndvi], dataMask: [s.dataMask && !cloud ? 1 : 0] };
}"#;

const S1_SAR_EVALSCRIPT: &str = r#"//VERSION=3
function setup() {
  return {
    input: [{ bands: ["VV", "dataMask"] }],
    output: [
      { id: "vv_db", bands: 1, sampleType: "FLOAT32" },
      { id: "dataMask", bands: 1 }
    ]
  };
}
function evaluatePixel(s) {
  var valid = s.dataMask && s.VV > 0;
  return { vv_db: [valid ? 10 * Math.log(s.VV) / Math.LN10 : 0], dataMask: [valid ? 1 : 0] };
}"#;

/// OAuth client credentials
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Read credentials from the environment; `None` unless both are set and non-empty
    pub fn from_env() -> Option<Self> {
        let read = |key: &str| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Some(Self {
            client_id: read(CLIENT_ID_ENV)?,
            client_secret: read(CLIENT_SECRET_ENV)?,
        })
    }
}

/// Collection-specific request settings
#[derive(Debug, Clone, Copy)]
struct Collection {
    data_type: &'static str,
    output_id: &'static str,
    evalscript: &'static str,
    resolution_m: u32,
    max_cloud_coverage: Option<u32>,
}

const SENTINEL2_L2A: Collection = Collection {
    data_type: "sentinel-2-l2a",
    output_id: "ndvi",
    evalscript: S2_NDVI_EVALSCRIPT,
    resolution_m: 10,
    max_cloud_coverage: Some(30),
};

const SENTINEL1_GRD: Collection = Collection {
    data_type: "sentinel-1-grd",
    output_id: "vv_db",
    evalscript: S1_SAR_EVALSCRIPT,
    resolution_m: 20,
    max_cloud_coverage: None,
};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct StatisticsResponse {
    #[serde(default)]
    data: Vec<IntervalStats>,
}

#[derive(Debug, Deserialize)]
struct IntervalStats {
    interval: Interval,
    #[serde(default)]
    outputs: BTreeMap<String, OutputStats>,
}

#[derive(Debug, Deserialize)]
struct Interval {
    to: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct OutputStats {
    #[serde(default)]
    bands: BTreeMap<String, BandStats>,
}

#[derive(Debug, Deserialize)]
struct BandStats {
    stats: BandSummary,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BandSummary {
    #[serde(default)]
    st_dev: Option<f64>,
    #[serde(default)]
    sample_count: u64,
    #[serde(default)]
    no_data_count: u64,
}

/// Sentinel Hub Statistical API connector
pub struct SentinelHubConnector {
    spec: InstrumentSpec,
    collection: Collection,
    base_url: String,
    credentials: Option<Credentials>,
    token: Mutex<Option<CachedToken>>,
    http_client: reqwest::Client,
}

impl SentinelHubConnector {
    fn build(
        spec: InstrumentSpec,
        collection: Collection,
        endpoint: Option<String>,
        credentials: Option<Credentials>,
    ) -> Result<Self, RegistryError> {
        if credentials.is_none() {
            info!(
                instrument = spec.name,
                "No Sentinel Hub credentials; instrument will report auth_error"
            );
        }
        Ok(Self {
            http_client: http::build_client(spec.name)?,
            base_url: endpoint
                .unwrap_or_else(|| SENTINEL_HUB_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            spec,
            collection,
            credentials,
            token: Mutex::new(None),
        })
    }

    /// Sentinel-2 NDVI spatial variability
    pub fn sentinel2_ndvi(
        endpoint: Option<String>,
        credentials: Option<Credentials>,
    ) -> Result<Self, RegistryError> {
        Self::build(
            InstrumentSpec {
                name: names::SENTINEL2_NDVI,
                display_name: "Sentinel-2 NDVI",
                kind: "vegetation_variability",
                unit: "ndvi",
                default_threshold: 0.1,
                sense: ThresholdSense::Above,
                environment_sensitive: true,
            },
            SENTINEL2_L2A,
            endpoint,
            credentials,
        )
    }

    /// Sentinel-1 VV backscatter spatial variability
    pub fn sentinel1_sar(
        endpoint: Option<String>,
        credentials: Option<Credentials>,
    ) -> Result<Self, RegistryError> {
        Self::build(
            InstrumentSpec {
                name: names::SENTINEL1_SAR,
                display_name: "Sentinel-1 SAR",
                kind: "backscatter_variability",
                unit: "dB",
                default_threshold: 2.5,
                sense: ThresholdSense::Above,
                environment_sensitive: true,
            },
            SENTINEL1_GRD,
            endpoint,
            credentials,
        )
    }

    /// Cached bearer token, fetching a new one when missing or near expiry
    async fn access_token(&self, credentials: &Credentials) -> Result<String, InstrumentFailure> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.token.clone());
            }
        }

        debug!(instrument = self.spec.name, "Requesting Sentinel Hub access token");
        let request = self
            .http_client
            .post(format!("{}{}", self.base_url, TOKEN_PATH))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
            ]);

        let response: TokenResponse = http::fetch_json(self.spec.name, request)
            .await
            .map_err(|failure| match failure.kind {
                // A rejected token request is an auth problem whatever the status
                FailureKind::Degraded | FailureKind::NoData => InstrumentFailure {
                    kind: FailureKind::AuthError,
                    ..failure
                },
                _ => failure,
            })?;

        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(3600));
        *cached = Some(CachedToken {
            token: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(response.access_token)
    }

    fn statistics_body(&self, bbox: &BoundingBox, window: &TimeWindow) -> serde_json::Value {
        let mut data_source = json!({ "type": self.collection.data_type });
        if let Some(max_cc) = self.collection.max_cloud_coverage {
            data_source["dataFilter"] = json!({ "maxCloudCoverage": max_cc });
        }

        json!({
            "input": {
                "bounds": {
                    "bbox": [bbox.lon_min, bbox.lat_min, bbox.lon_max, bbox.lat_max],
                    "properties": { "crs": "http://www.opengis.net/def/crs/OGC/1.3/CRS84" }
                },
                "data": [data_source]
            },
            "aggregation": {
                "timeRange": {
                    "from": window.start.to_rfc3339_opts(SecondsFormat::Secs, true),
                    "to": window.end.to_rfc3339_opts(SecondsFormat::Secs, true)
                },
                "aggregationInterval": { "of": "P30D" },
                "evalscript": self.collection.evalscript,
                "resx": self.collection.resolution_m,
                "resy": self.collection.resolution_m
            }
        })
    }

    fn reduce(&self, response: StatisticsResponse) -> InstrumentOutcome {
        let name = self.spec.name;
        let mut spreads = Vec::new();
        let (mut samples, mut no_data) = (0u64, 0u64);
        let mut latest: Option<DateTime<Utc>> = None;

        for interval in &response.data {
            let Some(band) = interval
                .outputs
                .get(self.collection.output_id)
                .and_then(|output| output.bands.values().next())
            else {
                continue;
            };
            let summary = &band.stats;
            samples += summary.sample_count;
            no_data += summary.no_data_count;

            if summary.sample_count <= summary.no_data_count {
                continue;
            }
            if let Some(st_dev) = summary.st_dev.filter(|v| v.is_finite()) {
                spreads.push(st_dev);
                latest = latest.max(Some(interval.interval.to));
            }
        }

        let Some(value) = stats::mean(&spreads) else {
            return Err(http::no_data(name, "No cloud-free acquisitions in window"));
        };

        let no_data_ratio = if samples == 0 {
            1.0
        } else {
            no_data as f64 / samples as f64
        };
        let note = format!(
            "{} intervals, {:.0}% no-data",
            spreads.len(),
            no_data_ratio * 100.0
        );
        let measurement = InstrumentMeasurement::observed(
            &self.spec,
            value,
            format!("Sentinel Hub {}", self.collection.data_type),
            note,
        )
        .acquired(latest);

        if no_data_ratio > MAX_NO_DATA_RATIO {
            Ok(measurement.degraded())
        } else {
            Ok(measurement)
        }
    }
}

#[async_trait]
impl InstrumentConnector for SentinelHubConnector {
    fn spec(&self) -> &InstrumentSpec {
        &self.spec
    }

    async fn measure(&self, bbox: &BoundingBox, window: &TimeWindow) -> InstrumentOutcome {
        let Some(credentials) = self.credentials.as_ref() else {
            return Err(InstrumentFailure::new(
                self.spec.name,
                FailureKind::AuthError,
                format!("{} / {} not set", CLIENT_ID_ENV, CLIENT_SECRET_ENV),
            ));
        };

        let token = self.access_token(credentials).await?;
        let request = self
            .http_client
            .post(format!("{}{}", self.base_url, STATISTICS_PATH))
            .bearer_auth(token)
            .json(&self.statistics_body(bbox, window));

        let response: StatisticsResponse = http::fetch_json(self.spec.name, request).await?;
        self.reduce(response)
    }
}

//! Core Types and Trait Definitions for archeo-core
//!
//! Defines the data model shared by every stage of an analysis:
//! - **Request:** `BoundingBox`, `TimeWindow`
//! - **Context:** `EnvironmentType`, `EnvironmentContext`
//! - **Instruments:** `InstrumentConnector` capability, `InstrumentSpec`,
//!   `InstrumentMeasurement` / `InstrumentFailure`
//! - **Decision:** `ConvergenceVerdict`, `Classification`, `RecommendedAction`
//! - **Audit:** `AnalysisRecord`
//!
//! Everything here is created within one request and never mutated after the
//! stage that produced it hands it on.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Request Types
// ============================================================================

/// Geographic area of interest, optionally with a depth range (metres below surface)
///
/// Invariant: `min < max` on every axis that is present. Area and volume are derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_max: Option<f64>,
}

/// Rejection reasons for a malformed bounding box
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BoundingBoxError {
    #[error("{axis} bounds must be finite")]
    NotFinite { axis: &'static str },

    #[error("{axis}_min ({min}) must be less than {axis}_max ({max})")]
    Inverted { axis: &'static str, min: f64, max: f64 },

    #[error("{axis} value {value} outside [{low}, {high}]")]
    OutOfRange {
        axis: &'static str,
        value: f64,
        low: f64,
        high: f64,
    },

    #[error("depth_min and depth_max must be given together")]
    PartialDepth,
}

impl BoundingBox {
    /// Create a validated surface bounding box
    pub fn new(
        lat_min: f64,
        lat_max: f64,
        lon_min: f64,
        lon_max: f64,
    ) -> Result<Self, BoundingBoxError> {
        let bbox = Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
            depth_min: None,
            depth_max: None,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    /// Square box of `half_size_deg` around a centre point
    pub fn around(lat: f64, lon: f64, half_size_deg: f64) -> Result<Self, BoundingBoxError> {
        Self::new(
            lat - half_size_deg,
            lat + half_size_deg,
            lon - half_size_deg,
            lon + half_size_deg,
        )
    }

    /// Add a depth range (metres below the surface or sea level)
    pub fn with_depth(mut self, depth_min: f64, depth_max: f64) -> Result<Self, BoundingBoxError> {
        self.depth_min = Some(depth_min);
        self.depth_max = Some(depth_max);
        self.validate()?;
        Ok(self)
    }

    /// Check every invariant
    ///
    /// Fields are public so deserialized or hand-built boxes must pass through here
    /// before any instrument is contacted.
    pub fn validate(&self) -> Result<(), BoundingBoxError> {
        check_axis("lat", self.lat_min, self.lat_max, -90.0, 90.0)?;
        check_axis("lon", self.lon_min, self.lon_max, -180.0, 180.0)?;
        match (self.depth_min, self.depth_max) {
            (None, None) => Ok(()),
            (Some(min), Some(max)) => check_axis("depth", min, max, f64::MIN, f64::MAX),
            _ => Err(BoundingBoxError::PartialDepth),
        }
    }

    /// Centre point (lat, lon)
    pub fn center(&self) -> (f64, f64) {
        (
            (self.lat_min + self.lat_max) / 2.0,
            (self.lon_min + self.lon_max) / 2.0,
        )
    }

    /// True if the point lies inside or on the edge of the box
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.lat_min && lat <= self.lat_max && lon >= self.lon_min && lon <= self.lon_max
    }

    /// North-south extent in metres
    pub fn height_m(&self) -> f64 {
        (self.lat_max - self.lat_min) * archeo_common::geo::METERS_PER_DEG_LAT
    }

    /// East-west extent in metres, measured at the centre latitude
    pub fn width_m(&self) -> f64 {
        let (lat, _) = self.center();
        (self.lon_max - self.lon_min) * archeo_common::geo::meters_per_deg_lon(lat)
    }

    /// Approximate surface area in square kilometres
    pub fn area_km2(&self) -> f64 {
        self.width_m() * self.height_m() / 1_000_000.0
    }

    /// Approximate volume in cubic kilometres, when a depth range is present
    pub fn volume_km3(&self) -> Option<f64> {
        let (min, max) = (self.depth_min?, self.depth_max?);
        Some(self.area_km2() * (max - min) / 1000.0)
    }

    /// Evenly spaced sample points covering the box, row-major from south-west
    ///
    /// `n` points per side, edges included. `n` is clamped to at least 2.
    pub fn grid(&self, n: usize) -> Vec<(f64, f64)> {
        let n = n.max(2);
        let step_lat = (self.lat_max - self.lat_min) / (n - 1) as f64;
        let step_lon = (self.lon_max - self.lon_min) / (n - 1) as f64;
        let mut points = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                points.push((
                    self.lat_min + step_lat * i as f64,
                    self.lon_min + step_lon * j as f64,
                ));
            }
        }
        points
    }
}

fn check_axis(
    axis: &'static str,
    min: f64,
    max: f64,
    low: f64,
    high: f64,
) -> Result<(), BoundingBoxError> {
    if !min.is_finite() || !max.is_finite() {
        return Err(BoundingBoxError::NotFinite { axis });
    }
    if min >= max {
        return Err(BoundingBoxError::Inverted { axis, min, max });
    }
    for value in [min, max] {
        if value < low || value > high {
            return Err(BoundingBoxError::OutOfRange {
                axis,
                value,
                low,
                high,
            });
        }
    }
    Ok(())
}

/// Acquisition window instruments should search within
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window of `days` ending at `end`
    pub fn last_days(days: u32, end: DateTime<Utc>) -> Self {
        Self {
            start: end - Duration::days(i64::from(days.max(1))),
            end,
        }
    }

    /// Start date formatted `YYYY-MM-DD`
    pub fn start_date(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    /// End date formatted `YYYY-MM-DD`
    pub fn end_date(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

// ============================================================================
// Environment Types
// ============================================================================

/// Closed set of environment categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentType {
    Desert,
    Forest,
    Mountain,
    Glacier,
    PolarIce,
    ShallowSea,
    DeepOcean,
    Coastal,
    Urban,
    Wetland,
    Unknown,
}

impl EnvironmentType {
    pub const ALL: [EnvironmentType; 11] = [
        Self::Desert,
        Self::Forest,
        Self::Mountain,
        Self::Glacier,
        Self::PolarIce,
        Self::ShallowSea,
        Self::DeepOcean,
        Self::Coastal,
        Self::Urban,
        Self::Wetland,
        Self::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Desert => "desert",
            Self::Forest => "forest",
            Self::Mountain => "mountain",
            Self::Glacier => "glacier",
            Self::PolarIce => "polar_ice",
            Self::ShallowSea => "shallow_sea",
            Self::DeepOcean => "deep_ocean",
            Self::Coastal => "coastal",
            Self::Urban => "urban",
            Self::Wetland => "wetland",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvironmentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|env| env.as_str() == s)
            .ok_or_else(|| format!("unknown environment category '{}'", s))
    }
}

/// Environment decision for one request
///
/// Created once by the classifier; read by every later stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentContext {
    pub environment: EnvironmentType,
    /// Classifier confidence (0.0-1.0)
    pub confidence: f64,
    /// Always queried, in priority order
    pub primary_instruments: Vec<String>,
    /// Queried opportunistically, in priority order
    pub secondary_instruments: Vec<String>,
    /// Converging instruments needed for a candidate
    pub minimum_required: usize,
}

impl EnvironmentContext {
    /// Primary then secondary instruments, first occurrence wins
    pub fn selected_instruments(&self) -> Vec<String> {
        let mut selected: Vec<String> = Vec::new();
        for name in self
            .primary_instruments
            .iter()
            .chain(self.secondary_instruments.iter())
        {
            if !selected.contains(name) {
                selected.push(name.clone());
            }
        }
        selected
    }
}

// ============================================================================
// Instrument Capability
// ============================================================================

/// Direction in which a value is anomalous
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdSense {
    /// Anomalous when value > threshold
    Above,
    /// Anomalous when value < threshold
    Below,
}

/// Static metadata every connector declares
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentSpec {
    /// Unique registry key, e.g. `modis_thermal`
    pub name: &'static str,
    pub display_name: &'static str,
    /// What the scalar measures, e.g. `thermal_contrast`
    pub kind: &'static str,
    pub unit: &'static str,
    pub default_threshold: f64,
    pub sense: ThresholdSense,
    /// Whether thresholds must be looked up per environment category
    pub environment_sensitive: bool,
}

/// Outcome of one connector call
pub type InstrumentOutcome = Result<InstrumentMeasurement, InstrumentFailure>;

/// Remote sensing data source capability
///
/// Connectors own their transport. They report every problem as an
/// `InstrumentFailure` value; the orchestrator adds the timeout budget.
///
/// # Example
/// ```rust,ignore
/// #[async_trait::async_trait]
/// impl InstrumentConnector for FlatStub {
///     fn spec(&self) -> &InstrumentSpec { &self.spec }
///
///     async fn measure(&self, _bbox: &BoundingBox, _window: &TimeWindow) -> InstrumentOutcome {
///         Ok(InstrumentMeasurement::observed(&self.spec, 0.4, "stub", "flat"))
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait InstrumentConnector: Send + Sync {
    /// Static metadata (name, unit, default threshold, sense)
    fn spec(&self) -> &InstrumentSpec;

    /// Registry key
    fn name(&self) -> &'static str {
        self.spec().name
    }

    /// Measure the area over the window
    async fn measure(&self, bbox: &BoundingBox, window: &TimeWindow) -> InstrumentOutcome;
}

// ============================================================================
// Measurement Types
// ============================================================================

/// Confidence banding shared by all instruments
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    None,
    Low,
    Moderate,
    High,
}

impl ConfidenceTier {
    /// Band a value/threshold ratio: >1.8 high, >1.4 moderate, >1.0 low
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio > 1.8 {
            Self::High
        } else if ratio > 1.4 {
            Self::Moderate
        } else if ratio > 1.0 {
            Self::Low
        } else {
            Self::None
        }
    }

    /// Evidence weight used by the convergence probability
    pub fn weight(self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Low => 0.3,
            Self::Moderate => 0.45,
            Self::High => 0.6,
        }
    }

    /// Ordinal 0-3
    pub fn rank(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Low => 1,
            Self::Moderate => 2,
            Self::High => 3,
        }
    }

    pub fn from_rank(rank: u8) -> Self {
        match rank {
            0 => Self::None,
            1 => Self::Low,
            2 => Self::Moderate,
            _ => Self::High,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
        }
    }
}

impl FromStr for ConfidenceTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "low" => Ok(Self::Low),
            "moderate" => Ok(Self::Moderate),
            "high" => Ok(Self::High),
            other => Err(format!("unknown confidence tier '{}'", other)),
        }
    }
}

/// Whether a measurement is a full or weak success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementMode {
    Real,
    /// Partial or low-quality source data; confidence capped at `low`
    Degraded,
}

/// One instrument's measurement for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentMeasurement {
    pub instrument: String,
    pub kind: String,
    pub value: f64,
    pub unit: String,
    /// Threshold the verdict below was computed against
    pub threshold: f64,
    pub exceeds_threshold: bool,
    pub confidence: ConfidenceTier,
    pub mode: MeasurementMode,
    pub note: String,
    pub source: String,
    pub acquired_at: Option<DateTime<Utc>>,
}

impl InstrumentMeasurement {
    /// Unevaluated measurement as produced by a connector
    ///
    /// Threshold is the instrument default; `exceeds_threshold` and `confidence`
    /// are filled in by the evaluator.
    pub fn observed(
        spec: &InstrumentSpec,
        value: f64,
        source: impl Into<String>,
        note: impl Into<String>,
    ) -> Self {
        Self {
            instrument: spec.name.to_string(),
            kind: spec.kind.to_string(),
            value,
            unit: spec.unit.to_string(),
            threshold: spec.default_threshold,
            exceeds_threshold: false,
            confidence: ConfidenceTier::None,
            mode: MeasurementMode::Real,
            note: note.into(),
            source: source.into(),
            acquired_at: None,
        }
    }

    /// Mark as a weak success
    pub fn degraded(mut self) -> Self {
        self.mode = MeasurementMode::Degraded;
        self
    }

    /// Attach the acquisition time of the newest source sample
    pub fn acquired(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.acquired_at = at;
        self
    }

    /// Counts toward convergence: exceeds with at least low confidence
    pub fn is_converging(&self) -> bool {
        self.exceeds_threshold && self.confidence >= ConfidenceTier::Low
    }
}

/// Why an instrument produced no measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    NoData,
    RateLimited,
    AuthError,
    Degraded,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::NoData => "no_data",
            Self::RateLimited => "rate_limited",
            Self::AuthError => "auth_error",
            Self::Degraded => "degraded",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(Self::Timeout),
            "no_data" => Ok(Self::NoData),
            "rate_limited" => Ok(Self::RateLimited),
            "auth_error" => Ok(Self::AuthError),
            "degraded" => Ok(Self::Degraded),
            other => Err(format!("unknown failure kind '{}'", other)),
        }
    }
}

/// An instrument that failed to speak
///
/// Occupies the same identity slot as a measurement: one per (instrument, request).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{instrument} {kind}: {reason}")]
pub struct InstrumentFailure {
    pub instrument: String,
    pub kind: FailureKind,
    pub reason: String,
}

impl InstrumentFailure {
    pub fn new(instrument: impl Into<String>, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            kind,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Decision Types
// ============================================================================

/// Final classification of an area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    KnownSiteRediscovery,
    Candidate,
    Natural,
    /// No instrument returned a usable measurement. Never a "no anomaly" verdict.
    InsufficientData,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KnownSiteRediscovery => "known_site_rediscovery",
            Self::Candidate => "candidate",
            Self::Natural => "natural",
            Self::InsufficientData => "insufficient_data",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Follow-up suggested for a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    FieldVerification,
    Monitoring,
    CatalogReview,
    None,
}

/// Catalog entry near or overlapping the requested area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownSiteRef {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub radius_m: f64,
    /// Distance from the bbox centre to the site centre
    pub distance_m: f64,
    /// Site centre inside the bbox, or bbox centre inside the site radius
    pub is_contained: bool,
    /// Site circle touches the bbox
    pub overlaps: bool,
}

/// Convergence decision for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceVerdict {
    /// Quorum of converging instruments reached
    pub anomaly_detected: bool,
    pub classification: Classification,
    pub archaeological_probability: f64,
    pub confidence_level: ConfidenceTier,
    pub instruments_converging: usize,
    pub minimum_required: usize,
    pub instruments_queried: usize,
    pub instruments_responded: usize,
    pub recommended_action: RecommendedAction,
    /// Converging measurements, ordered by instrument name
    pub contributing: Vec<InstrumentMeasurement>,
    pub known_site: Option<KnownSiteRef>,
}

// ============================================================================
// Audit Types
// ============================================================================

/// Everything about one analysis run
///
/// Written once by the persistence layer; read by reporting tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub analysis_id: Uuid,
    pub region_name: Option<String>,
    pub bbox: BoundingBox,
    pub environment: EnvironmentContext,
    pub measurements: Vec<InstrumentMeasurement>,
    pub failures: Vec<InstrumentFailure>,
    pub verdict: ConvergenceVerdict,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Tests
// ============================================================================

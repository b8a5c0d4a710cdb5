//! Threshold Evaluator
//!
//! Annotates a raw measurement with the threshold that applies in the detected
//! environment, whether the value exceeds it, and a confidence tier.
//!
//! # Threshold Resolution
//! 1. Configured override for (instrument, environment)
//! 2. Built-in override for (instrument, environment), environment-sensitive instruments only
//! 3. Instrument default; widened by 25% in the exceedance direction when the
//!    environment is `unknown`
//!
//! # Confidence Banding
//! Ratio of value to threshold (threshold to value for below-sense instruments):
//! - > 1.8: high
//! - > 1.4: moderate
//! - > 1.0: low
//! - otherwise: none
//!
//! Degraded measurements are capped at low. The banding is the same for every
//! instrument so tiers can be aggregated by the convergence engine.
//!
//! # Example
//! ```rust,ignore
//! let table = ThresholdTable::from_specs(registry_specs, &config.threshold_overrides);
//! let evaluated = table.evaluate(&raw, &context);
//! assert_eq!(evaluated.threshold, table.threshold_for("modis_thermal", EnvironmentType::Desert));
//! ```

use crate::config::ThresholdOverride;
use crate::connectors::names;
use crate::types::{
    ConfidenceTier, EnvironmentContext, EnvironmentType, InstrumentMeasurement, InstrumentSpec,
    MeasurementMode, ThresholdSense,
};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Threshold widening factor for unclassified terrain
pub const UNKNOWN_WIDENING: f64 = 1.25;

/// Built-in environment-specific thresholds
///
/// Thermal contrast is naturally larger on bare desert than on ice; relief
/// varies more in mountains than on plains. Anything not listed uses the default.
const BUILTIN_OVERRIDES: &[(&str, EnvironmentType, f64)] = &[
    (names::MODIS_THERMAL, EnvironmentType::Desert, 2.0),
    (names::MODIS_THERMAL, EnvironmentType::Glacier, 0.8),
    (names::MODIS_THERMAL, EnvironmentType::PolarIce, 0.8),
    (names::MODIS_THERMAL, EnvironmentType::Forest, 1.0),
    (names::MODIS_THERMAL, EnvironmentType::Urban, 2.5),
    (names::MODIS_NDVI, EnvironmentType::Desert, 0.05),
    (names::MODIS_NDVI, EnvironmentType::Forest, 0.12),
    (names::MODIS_NDVI, EnvironmentType::Wetland, 0.1),
    (names::MODIS_LAI, EnvironmentType::Forest, 0.9),
    (names::SRTM_ELEVATION, EnvironmentType::Desert, 1.5),
    (names::SRTM_ELEVATION, EnvironmentType::Forest, 3.0),
    (names::SRTM_ELEVATION, EnvironmentType::Mountain, 4.0),
    (names::SRTM_ELEVATION, EnvironmentType::Coastal, 1.5),
    (names::GEBCO_BATHYMETRY, EnvironmentType::ShallowSea, 10.0),
    (names::GEBCO_BATHYMETRY, EnvironmentType::DeepOcean, 25.0),
    (names::SENTINEL2_NDVI, EnvironmentType::Desert, 0.06),
    (names::SENTINEL2_NDVI, EnvironmentType::Forest, 0.15),
    (names::SENTINEL1_SAR, EnvironmentType::Desert, 2.0),
    (names::SENTINEL1_SAR, EnvironmentType::Forest, 3.0),
    (names::SENTINEL1_SAR, EnvironmentType::Urban, 3.5),
    (names::SENTINEL1_SAR, EnvironmentType::Glacier, 2.0),
    (names::ICESAT2_ALTIMETRY, EnvironmentType::Glacier, 0.5),
    (names::ICESAT2_ALTIMETRY, EnvironmentType::PolarIce, 0.5),
    (names::ICESAT2_ALTIMETRY, EnvironmentType::Mountain, 1.5),
];

/// Static threshold metadata for one instrument
#[derive(Debug, Clone, Copy, PartialEq)]
struct InstrumentThreshold {
    default: f64,
    sense: ThresholdSense,
    environment_sensitive: bool,
}

/// Read-only threshold lookup, built once at start-up
#[derive(Debug, Clone, Default)]
pub struct ThresholdTable {
    instruments: HashMap<String, InstrumentThreshold>,
    builtin: HashMap<(String, EnvironmentType), f64>,
    configured: HashMap<(String, EnvironmentType), f64>,
}

impl ThresholdTable {
    /// Table for the given instruments plus configured overrides
    pub fn from_specs<'a>(
        specs: impl IntoIterator<Item = &'a InstrumentSpec>,
        overrides: &[ThresholdOverride],
    ) -> Self {
        let instruments = specs
            .into_iter()
            .map(|spec| {
                (
                    spec.name.to_string(),
                    InstrumentThreshold {
                        default: spec.default_threshold,
                        sense: spec.sense,
                        environment_sensitive: spec.environment_sensitive,
                    },
                )
            })
            .collect();

        let builtin = BUILTIN_OVERRIDES
            .iter()
            .map(|&(name, env, threshold)| ((name.to_string(), env), threshold))
            .collect();

        let configured = overrides
            .iter()
            .map(|o| ((o.instrument.clone(), o.environment), o.threshold))
            .collect();

        Self {
            instruments,
            builtin,
            configured,
        }
    }

    /// Threshold and sense for an instrument in an environment
    ///
    /// Instruments the table was not built with fall back to `fallback_default`,
    /// above-sense, not environment-sensitive.
    fn resolve(
        &self,
        instrument: &str,
        environment: EnvironmentType,
        fallback_default: f64,
    ) -> (f64, ThresholdSense) {
        let meta = self.instruments.get(instrument).copied().unwrap_or_else(|| {
            warn!(instrument, "No threshold metadata; using measurement default");
            InstrumentThreshold {
                default: fallback_default,
                sense: ThresholdSense::Above,
                environment_sensitive: false,
            }
        });

        let key = (instrument.to_string(), environment);
        if let Some(&threshold) = self.configured.get(&key) {
            return (threshold, meta.sense);
        }
        if meta.environment_sensitive {
            if let Some(&threshold) = self.builtin.get(&key) {
                return (threshold, meta.sense);
            }
        }

        let threshold = if environment == EnvironmentType::Unknown {
            widen(meta.default, meta.sense)
        } else {
            meta.default
        };
        (threshold, meta.sense)
    }

    /// Applicable threshold for a registered instrument
    pub fn threshold_for(&self, instrument: &str, environment: EnvironmentType) -> Option<f64> {
        self.instruments.get(instrument)?;
        Some(self.resolve(instrument, environment, 0.0).0)
    }

    /// Annotate one measurement for the request's environment
    pub fn evaluate(
        &self,
        measurement: &InstrumentMeasurement,
        context: &EnvironmentContext,
    ) -> InstrumentMeasurement {
        let (threshold, sense) = self.resolve(
            &measurement.instrument,
            context.environment,
            measurement.threshold,
        );
        let (exceeds, ratio) = compare(measurement.value, threshold, sense);

        let mut confidence = if exceeds {
            ConfidenceTier::from_ratio(ratio)
        } else {
            ConfidenceTier::None
        };
        if measurement.mode == MeasurementMode::Degraded {
            confidence = confidence.min(ConfidenceTier::Low);
        }

        debug!(
            instrument = %measurement.instrument,
            value = measurement.value,
            threshold,
            exceeds,
            confidence = confidence.as_str(),
            "Measurement evaluated"
        );

        InstrumentMeasurement {
            threshold,
            exceeds_threshold: exceeds,
            confidence,
            ..measurement.clone()
        }
    }

    /// Evaluate a whole batch
    pub fn evaluate_all(
        &self,
        measurements: &[InstrumentMeasurement],
        context: &EnvironmentContext,
    ) -> Vec<InstrumentMeasurement> {
        measurements
            .iter()
            .map(|m| self.evaluate(m, context))
            .collect()
    }
}

/// Move a threshold 25% further from "normal"
fn widen(threshold: f64, sense: ThresholdSense) -> f64 {
    match sense {
        ThresholdSense::Above => threshold * UNKNOWN_WIDENING,
        ThresholdSense::Below => threshold / UNKNOWN_WIDENING,
    }
}

/// (exceeds, ratio) for a value against a threshold
///
/// Non-finite values never exceed. For below-sense instruments a non-positive
/// value or threshold gives ratio 0.
fn compare(value: f64, threshold: f64, sense: ThresholdSense) -> (bool, f64) {
    if !value.is_finite() || !threshold.is_finite() {
        return (false, 0.0);
    }
    match sense {
        ThresholdSense::Above => {
            let ratio = if threshold > 0.0 { value / threshold } else { 0.0 };
            (value > threshold, ratio)
        }
        ThresholdSense::Below => {
            let ratio = if value > 0.0 && threshold > 0.0 {
                threshold / value
            } else {
                0.0
            };
            (value < threshold, ratio)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(
        name: &'static str,
        default: f64,
        sense: ThresholdSense,
        sensitive: bool,
    ) -> InstrumentSpec {
        InstrumentSpec {
            name,
            display_name: name,
            kind: "test",
            unit: "u",
            default_threshold: default,
            sense,
            environment_sensitive: sensitive,
        }
    }

    fn context(environment: EnvironmentType) -> EnvironmentContext {
        EnvironmentContext {
            environment,
            confidence: 0.9,
            primary_instruments: Vec::new(),
            secondary_instruments: Vec::new(),
            minimum_required: 2,
        }
    }

    fn table(overrides: &[ThresholdOverride]) -> ThresholdTable {
        let specs = [
            spec(names::MODIS_THERMAL, 1.5, ThresholdSense::Above, true),
            spec(names::EMODNET_BATHYMETRY, 3.0, ThresholdSense::Above, false),
            spec(names::ERA5_SOIL_MOISTURE, 0.85, ThresholdSense::Below, false),
        ];
        ThresholdTable::from_specs(specs.iter(), overrides)
    }

    fn raw(s: &InstrumentSpec, value: f64) -> InstrumentMeasurement {
        InstrumentMeasurement::observed(s, value, "test", "")
    }

    #[test]
    fn test_environment_override_beats_default() {
        let t = table(&[]);
        assert_eq!(t.threshold_for(names::MODIS_THERMAL, EnvironmentType::Desert), Some(2.0));
        assert_eq!(t.threshold_for(names::MODIS_THERMAL, EnvironmentType::Glacier), Some(0.8));
        assert_eq!(t.threshold_for(names::MODIS_THERMAL, EnvironmentType::Mountain), Some(1.5));
        assert_eq!(t.threshold_for("not_registered", EnvironmentType::Desert), None);
    }

    #[test]
    fn test_configured_override_beats_builtin_and_insensitivity() {
        let t = table(&[
            ThresholdOverride {
                instrument: names::MODIS_THERMAL.into(),
                environment: EnvironmentType::Desert,
                threshold: 3.0,
            },
            ThresholdOverride {
                instrument: names::EMODNET_BATHYMETRY.into(),
                environment: EnvironmentType::ShallowSea,
                threshold: 2.0,
            },
        ]);
        assert_eq!(t.threshold_for(names::MODIS_THERMAL, EnvironmentType::Desert), Some(3.0));
        assert_eq!(
            t.threshold_for(names::EMODNET_BATHYMETRY, EnvironmentType::ShallowSea),
            Some(2.0)
        );
    }

    #[test]
    fn test_unknown_environment_widens() {
        let t = table(&[]);
        let above = t.threshold_for(names::MODIS_THERMAL, EnvironmentType::Unknown).unwrap();
        assert!((above - 1.875).abs() < 1e-12);
        let below = t
            .threshold_for(names::ERA5_SOIL_MOISTURE, EnvironmentType::Unknown)
            .unwrap();
        assert!((below - 0.68).abs() < 1e-12);
    }

    #[test]
    fn test_banding_above_sense() {
        let t = table(&[]);
        let s = spec(names::MODIS_THERMAL, 1.5, ThresholdSense::Above, true);
        let ctx = context(EnvironmentType::Mountain);

        let cases = [
            (3.0, true, ConfidenceTier::High),
            (2.4, true, ConfidenceTier::Moderate),
            (1.8, true, ConfidenceTier::Low),
            (1.5, false, ConfidenceTier::None),
            (0.2, false, ConfidenceTier::None),
        ];
        for (value, exceeds, tier) in cases {
            let m = t.evaluate(&raw(&s, value), &ctx);
            assert_eq!(m.exceeds_threshold, exceeds, "value {}", value);
            assert_eq!(m.confidence, tier, "value {}", value);
            assert_eq!(m.threshold, 1.5);
        }
    }

    #[test]
    fn test_banding_below_sense() {
        let t = table(&[]);
        let s = spec(names::ERA5_SOIL_MOISTURE, 0.85, ThresholdSense::Below, false);
        let ctx = context(EnvironmentType::Desert);

        let dry = t.evaluate(&raw(&s, 0.4), &ctx);
        assert!(dry.exceeds_threshold);
        assert_eq!(dry.confidence, ConfidenceTier::High);

        let wet = t.evaluate(&raw(&s, 1.1), &ctx);
        assert!(!wet.exceeds_threshold);
        assert_eq!(wet.confidence, ConfidenceTier::None);

        // Non-positive values exceed but carry no confidence
        let zero = t.evaluate(&raw(&s, 0.0), &ctx);
        assert!(zero.exceeds_threshold);
        assert_eq!(zero.confidence, ConfidenceTier::None);
        assert!(!zero.is_converging());
    }

    #[test]
    fn test_degraded_capped_at_low() {
        let t = table(&[]);
        let s = spec(names::MODIS_THERMAL, 1.5, ThresholdSense::Above, true);
        let m = t.evaluate(&raw(&s, 10.0).degraded(), &context(EnvironmentType::Mountain));
        assert!(m.exceeds_threshold);
        assert_eq!(m.confidence, ConfidenceTier::Low);
        assert!(m.is_converging());
    }

    #[test]
    fn test_non_finite_value_never_exceeds() {
        let t = table(&[]);
        let s = spec(names::MODIS_THERMAL, 1.5, ThresholdSense::Above, true);
        let m = t.evaluate(&raw(&s, f64::NAN), &context(EnvironmentType::Mountain));
        assert!(!m.exceeds_threshold);
        assert_eq!(m.confidence, ConfidenceTier::None);
    }

    #[test]
    fn test_unregistered_instrument_uses_measurement_default() {
        let t = ThresholdTable::default();
        let s = spec("stub", 1.0, ThresholdSense::Above, false);
        let m = t.evaluate(&raw(&s, 2.0), &context(EnvironmentType::Desert));
        assert_eq!(m.threshold, 1.0);
        assert_eq!(m.confidence, ConfidenceTier::High);
    }
}

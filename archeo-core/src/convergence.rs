//! Convergence Decision Engine
//!
//! Turns the evaluated outcome set of one request into a verdict. Pure and
//! deterministic: outcomes are sorted by instrument name before any arithmetic,
//! so the same set yields the same verdict whatever order it arrives in.
//!
//! # Rules (first match wins)
//! 1. A known site containing the area: `known_site_rediscovery`
//! 2. At least `minimum_required` converging instruments: `candidate`
//! 3. No instrument responded: `insufficient_data`
//! 4. Otherwise: `natural`
//!
//! # Probability
//! `raw = 0.5 * converging/queried + 0.5 * noisy_or(tier weights)`, then
//! candidate `0.5 + 0.5*raw`, natural `0.5*raw`, known site `max(0.9, 0.5 + 0.5*raw)`,
//! insufficient data `0`. Both terms of `raw` only grow as instruments converge.

use crate::types::{
    Classification, ConfidenceTier, ConvergenceVerdict, EnvironmentContext, InstrumentFailure,
    InstrumentMeasurement, KnownSiteRef, RecommendedAction,
};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::info;

/// Candidate probability at or above which field verification is recommended
pub const FIELD_VERIFICATION_PROBABILITY: f64 = 0.7;

/// Floor for areas inside a catalogued site
pub const KNOWN_SITE_PROBABILITY: f64 = 0.9;

/// Contract violations in the outcome set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvergenceError {
    /// The same instrument appears twice across measurements and failures
    #[error("Duplicate outcome for instrument {0}")]
    DuplicateInstrument(String),
}

/// Bayesian update with independent evidence
///
/// Formula: P(A|B) = 1 - (1 - P(A)) * (1 - P(B))
pub fn bayesian_update(prior: f64, evidence: f64) -> f64 {
    1.0 - (1.0 - prior) * (1.0 - evidence)
}

/// Noisy-OR combination of independent evidence weights
pub fn noisy_or(weights: impl IntoIterator<Item = f64>) -> f64 {
    weights.into_iter().fold(0.0, bayesian_update)
}

/// Raw convergence score in [0, 1]
fn raw_score(contributing: &[InstrumentMeasurement], queried: usize) -> f64 {
    let coverage = if queried == 0 {
        0.0
    } else {
        contributing.len() as f64 / queried as f64
    };
    let evidence = noisy_or(contributing.iter().map(|m| m.confidence.weight()));
    0.5 * coverage + 0.5 * evidence
}

/// Mean tier of the converging instruments, rounded down
fn mean_tier(contributing: &[InstrumentMeasurement]) -> ConfidenceTier {
    if contributing.is_empty() {
        return ConfidenceTier::None;
    }
    let total: usize = contributing
        .iter()
        .map(|m| usize::from(m.confidence.rank()))
        .sum();
    let mean = total / contributing.len();
    ConfidenceTier::from_rank(u8::try_from(mean).unwrap_or(u8::MAX))
}

/// Confidence in a "nothing here" verdict grows with how many instruments answered
fn coverage_tier(responded: usize, queried: usize) -> ConfidenceTier {
    if queried == 0 {
        return ConfidenceTier::None;
    }
    let coverage = responded as f64 / queried as f64;
    if coverage >= 0.8 {
        ConfidenceTier::High
    } else if coverage >= 0.5 {
        ConfidenceTier::Moderate
    } else {
        ConfidenceTier::Low
    }
}

/// Decide the verdict for one request
///
/// `measurements` must already be evaluated against thresholds. `known_site` is the
/// catalog lookup result; only a containing match overrides convergence.
pub fn decide(
    measurements: &[InstrumentMeasurement],
    failures: &[InstrumentFailure],
    context: &EnvironmentContext,
    known_site: Option<&KnownSiteRef>,
) -> Result<ConvergenceVerdict, ConvergenceError> {
    let mut seen = BTreeSet::new();
    for name in measurements
        .iter()
        .map(|m| &m.instrument)
        .chain(failures.iter().map(|f| &f.instrument))
    {
        if !seen.insert(name.as_str()) {
            return Err(ConvergenceError::DuplicateInstrument(name.clone()));
        }
    }

    let mut sorted: Vec<&InstrumentMeasurement> = measurements.iter().collect();
    sorted.sort_by(|a, b| a.instrument.cmp(&b.instrument));

    let contributing: Vec<InstrumentMeasurement> = sorted
        .into_iter()
        .filter(|m| m.is_converging())
        .cloned()
        .collect();

    let queried = measurements.len() + failures.len();
    let responded = measurements.len();
    let converging = contributing.len();
    let minimum_required = context.minimum_required.max(1);
    let anomaly_detected = converging >= minimum_required;
    let raw = raw_score(&contributing, queried);

    let (classification, probability, confidence_level) =
        if known_site.is_some_and(|site| site.is_contained) {
            (
                Classification::KnownSiteRediscovery,
                (0.5 + 0.5 * raw).max(KNOWN_SITE_PROBABILITY),
                ConfidenceTier::High,
            )
        } else if anomaly_detected {
            (
                Classification::Candidate,
                0.5 + 0.5 * raw,
                mean_tier(&contributing),
            )
        } else if responded == 0 {
            (Classification::InsufficientData, 0.0, ConfidenceTier::None)
        } else {
            (
                Classification::Natural,
                0.5 * raw,
                coverage_tier(responded, queried),
            )
        };

    let recommended_action = match classification {
        Classification::KnownSiteRediscovery => RecommendedAction::CatalogReview,
        Classification::Candidate if probability >= FIELD_VERIFICATION_PROBABILITY => {
            RecommendedAction::FieldVerification
        }
        Classification::Candidate => RecommendedAction::Monitoring,
        Classification::Natural | Classification::InsufficientData => RecommendedAction::None,
    };

    info!(
        classification = classification.as_str(),
        probability,
        converging,
        minimum_required,
        queried,
        responded,
        "Convergence decided"
    );

    Ok(ConvergenceVerdict {
        anomaly_detected,
        classification,
        archaeological_probability: probability.clamp(0.0, 1.0),
        confidence_level,
        instruments_converging: converging,
        minimum_required,
        instruments_queried: queried,
        instruments_responded: responded,
        recommended_action,
        contributing,
        known_site: known_site.cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        EnvironmentType, FailureKind, InstrumentSpec, MeasurementMode, ThresholdSense,
    };

    fn measurement(name: &str, exceeds: bool, confidence: ConfidenceTier) -> InstrumentMeasurement {
        let spec = InstrumentSpec {
            name: "placeholder",
            display_name: "placeholder",
            kind: "test",
            unit: "u",
            default_threshold: 1.0,
            sense: ThresholdSense::Above,
            environment_sensitive: false,
        };
        InstrumentMeasurement {
            instrument: name.to_string(),
            exceeds_threshold: exceeds,
            confidence,
            mode: MeasurementMode::Real,
            ..InstrumentMeasurement::observed(&spec, 2.0, "test", "")
        }
    }

    fn timeout(name: &str) -> InstrumentFailure {
        InstrumentFailure::new(name, FailureKind::Timeout, "exceeded budget")
    }

    fn desert() -> EnvironmentContext {
        EnvironmentContext {
            environment: EnvironmentType::Desert,
            confidence: 0.9,
            primary_instruments: Vec::new(),
            secondary_instruments: Vec::new(),
            minimum_required: 2,
        }
    }

    fn site(contained: bool) -> KnownSiteRef {
        KnownSiteRef {
            name: "Giza Necropolis".into(),
            lat: 29.9792,
            lon: 31.1342,
            radius_m: 1500.0,
            distance_m: 400.0,
            is_contained: contained,
            overlaps: true,
        }
    }

    #[test]
    fn test_bayesian_update_and_noisy_or() {
        assert!((bayesian_update(0.9, 0.9) - 0.99).abs() < 1e-12);
        assert_eq!(noisy_or(Vec::<f64>::new()), 0.0);
        assert!((noisy_or([0.6, 0.6]) - 0.84).abs() < 1e-12);
    }

    #[test]
    fn test_two_high_of_five_is_candidate() {
        let measurements = vec![
            measurement("a", true, ConfidenceTier::High),
            measurement("b", true, ConfidenceTier::High),
            measurement("c", false, ConfidenceTier::None),
            measurement("d", false, ConfidenceTier::None),
            measurement("e", false, ConfidenceTier::None),
        ];
        let v = decide(&measurements, &[], &desert(), None).unwrap();
        assert_eq!(v.classification, Classification::Candidate);
        assert!(v.anomaly_detected);
        assert_eq!(v.instruments_converging, 2);
        assert!((v.archaeological_probability - 0.81).abs() < 1e-12);
        assert_eq!(v.recommended_action, RecommendedAction::FieldVerification);
        assert_eq!(v.confidence_level, ConfidenceTier::High);
        assert_eq!(v.contributing.len(), 2);
    }

    #[test]
    fn test_weak_candidate_is_monitoring() {
        let mut measurements = vec![
            measurement("a", true, ConfidenceTier::Low),
            measurement("b", true, ConfidenceTier::Low),
        ];
        let failures: Vec<_> = (0..8).map(|i| timeout(&format!("f{}", i))).collect();
        measurements.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        let v = decide(&measurements, &failures, &desert(), None).unwrap();
        assert_eq!(v.classification, Classification::Candidate);
        assert!(v.archaeological_probability > 0.5 && v.archaeological_probability < 0.7);
        assert_eq!(v.recommended_action, RecommendedAction::Monitoring);
        assert_eq!(v.confidence_level, ConfidenceTier::Low);
    }

    #[test]
    fn test_all_failures_is_insufficient_data() {
        let failures: Vec<_> = ["a", "b", "c", "d", "e"].iter().map(|n| timeout(n)).collect();
        let v = decide(&[], &failures, &desert(), None).unwrap();
        assert_eq!(v.classification, Classification::InsufficientData);
        assert_eq!(v.instruments_converging, 0);
        assert_eq!(v.instruments_queried, 5);
        assert_eq!(v.instruments_responded, 0);
        assert_eq!(v.archaeological_probability, 0.0);
        assert_eq!(v.recommended_action, RecommendedAction::None);
        assert!(!v.anomaly_detected);
    }

    #[test]
    fn test_natural_confidence_tracks_coverage() {
        let quiet = vec![
            measurement("a", false, ConfidenceTier::None),
            measurement("b", true, ConfidenceTier::Moderate),
        ];
        let v = decide(&quiet, &[], &desert(), None).unwrap();
        assert_eq!(v.classification, Classification::Natural);
        assert_eq!(v.confidence_level, ConfidenceTier::High);
        assert!(v.archaeological_probability < 0.5);

        let failures = vec![timeout("c"), timeout("d"), timeout("e")];
        let v = decide(&quiet, &failures, &desert(), None).unwrap();
        assert_eq!(v.confidence_level, ConfidenceTier::Low);
    }

    #[test]
    fn test_contained_known_site_takes_precedence() {
        let v = decide(&[], &[timeout("a")], &desert(), Some(&site(true))).unwrap();
        assert_eq!(v.classification, Classification::KnownSiteRediscovery);
        assert_eq!(v.instruments_converging, 0);
        assert_eq!(v.recommended_action, RecommendedAction::CatalogReview);
        assert!(v.archaeological_probability >= KNOWN_SITE_PROBABILITY);
        assert!(v.known_site.is_some());

        // Nearby but not containing: reported, not decisive
        let m = vec![measurement("a", false, ConfidenceTier::None)];
        let v = decide(&m, &[], &desert(), Some(&site(false))).unwrap();
        assert_eq!(v.classification, Classification::Natural);
        assert_eq!(v.known_site.unwrap().name, "Giza Necropolis");
    }

    #[test]
    fn test_duplicate_instruments_rejected() {
        let m = vec![measurement("a", true, ConfidenceTier::High)];
        let err = decide(&m, &[timeout("a")], &desert(), None).unwrap_err();
        assert_eq!(err, ConvergenceError::DuplicateInstrument("a".into()));
    }

    #[test]
    fn test_order_independent() {
        let mut m = vec![
            measurement("c", true, ConfidenceTier::Moderate),
            measurement("a", true, ConfidenceTier::High),
            measurement("b", false, ConfidenceTier::None),
        ];
        let f = vec![timeout("e"), timeout("d")];
        let first = decide(&m, &f, &desert(), None).unwrap();
        m.reverse();
        let second = decide(&m, &f, &desert(), None).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.contributing[0].instrument, "a");
    }

    #[test]
    fn test_probability_monotonic_in_converging() {
        let names = ["a", "b", "c", "d", "e", "f"];
        let mut previous = -1.0;
        for converging in 0..=names.len() {
            let m: Vec<_> = names
                .iter()
                .enumerate()
                .map(|(i, n)| {
                    if i < converging {
                        measurement(n, true, ConfidenceTier::Moderate)
                    } else {
                        measurement(n, false, ConfidenceTier::None)
                    }
                })
                .collect();
            let v = decide(&m, &[], &desert(), None).unwrap();
            assert!(
                v.archaeological_probability >= previous,
                "{} converging gave {}",
                converging,
                v.archaeological_probability
            );
            previous = v.archaeological_probability;
        }
    }
}

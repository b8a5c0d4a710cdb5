//! Test Helper Utilities
//!
//! Shared stubs and builders for the archeo-core integration tests

#![allow(dead_code)]

pub mod stubs;

pub use stubs::{Behavior, StubConnector};

use archeo_core::connectors::InstrumentRegistry;
use archeo_core::environment::EnvironmentClassifier;
use archeo_core::evaluator::ThresholdTable;
use archeo_core::known_sites::{KnownSite, KnownSiteCatalog};
use archeo_core::orchestrator::MeasurementOrchestrator;
use archeo_core::pipeline::AnalysisPipeline;
use archeo_core::types::BoundingBox;
use std::sync::Arc;
use std::time::Duration;

/// Per-instrument budget used by `build_pipeline`
pub const INSTRUMENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Request deadline used by `build_pipeline`
pub const REQUEST_DEADLINE: Duration = Duration::from_secs(5);

/// Small box on the Giza plateau
pub fn giza_bbox() -> BoundingBox {
    BoundingBox::around(29.975, 31.138, 0.01).unwrap()
}

/// Instruments the built-in classifier selects for `giza_bbox`
pub fn giza_instruments() -> Vec<String> {
    let (lat, lon) = giza_bbox().center();
    EnvironmentClassifier::default()
        .classify(lat, lon)
        .selected_instruments()
}

pub fn giza_catalog() -> KnownSiteCatalog {
    KnownSiteCatalog::from_sites(vec![KnownSite {
        name: "Giza Necropolis".into(),
        lat: 29.9792,
        lon: 31.1342,
        radius_m: 1500.0,
    }])
}

/// Registry of stubs, one per (name, behavior)
pub fn build_registry(stubs: Vec<(String, Behavior)>, timeout: Duration) -> InstrumentRegistry {
    let mut registry = InstrumentRegistry::new(timeout);
    for (name, behavior) in stubs {
        registry
            .register(Arc::new(StubConnector::new(&name, behavior)), None)
            .unwrap();
    }
    registry
}

/// Pipeline over stubs with the built-in classifier
pub fn build_pipeline_with(
    stubs: Vec<(String, Behavior)>,
    catalog: KnownSiteCatalog,
    deadline: Duration,
    timeout: Duration,
) -> AnalysisPipeline {
    let registry = build_registry(stubs, timeout);
    let thresholds = ThresholdTable::from_specs(registry.specs(), &[]);
    let orchestrator = MeasurementOrchestrator::new(Arc::new(registry), deadline, 30);
    AnalysisPipeline::new(
        EnvironmentClassifier::default(),
        orchestrator,
        thresholds,
        catalog,
    )
}

pub fn build_pipeline(stubs: Vec<(String, Behavior)>, catalog: KnownSiteCatalog) -> AnalysisPipeline {
    build_pipeline_with(stubs, catalog, REQUEST_DEADLINE, INSTRUMENT_TIMEOUT)
}

/// Pair every Giza instrument with a behavior; `pick` sees the instrument's index
pub fn giza_stubs(pick: impl Fn(usize) -> Behavior) -> Vec<(String, Behavior)> {
    giza_instruments()
        .into_iter()
        .enumerate()
        .map(|(i, name)| (name, pick(i)))
        .collect()
}

//! Scripted instrument connectors
//!
//! Every stub uses a unit threshold of 1.0 (above-sense, not environment
//! sensitive), so a value of 2.0 is a high-confidence exceedance and 0.5 is a
//! clear non-exceedance in any environment except `unknown`.

use archeo_core::types::{
    BoundingBox, FailureKind, InstrumentConnector, InstrumentFailure, InstrumentMeasurement,
    InstrumentOutcome, InstrumentSpec, ThresholdSense, TimeWindow,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What a stub does when measured
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Respond immediately with this value
    Value(f64),
    /// Respond with this value, flagged as degraded
    DegradedValue(f64),
    /// Respond with this value after a delay
    Delayed(Duration, f64),
    /// Report a failure immediately
    Fail(FailureKind),
    /// Never respond within any sane budget
    Hang,
    /// Panic inside the connector
    Panic,
}

impl Behavior {
    /// Converging value at high confidence
    pub fn high() -> Self {
        Self::Value(2.0)
    }

    /// Non-converging value
    pub fn quiet() -> Self {
        Self::Value(0.5)
    }
}

pub struct StubConnector {
    spec: InstrumentSpec,
    behavior: Behavior,
    calls: AtomicUsize,
}

impl StubConnector {
    pub fn new(name: &str, behavior: Behavior) -> Self {
        // Specs hold 'static names
        let name: &'static str = Box::leak(name.to_string().into_boxed_str());
        Self {
            spec: InstrumentSpec {
                name,
                display_name: name,
                kind: "stub",
                unit: "ratio",
                default_threshold: 1.0,
                sense: ThresholdSense::Above,
                environment_sensitive: false,
            },
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InstrumentConnector for StubConnector {
    fn spec(&self) -> &InstrumentSpec {
        &self.spec
    }

    async fn measure(&self, _bbox: &BoundingBox, _window: &TimeWindow) -> InstrumentOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Value(v) => Ok(InstrumentMeasurement::observed(&self.spec, *v, "stub", "")),
            Behavior::DegradedValue(v) => {
                Ok(InstrumentMeasurement::observed(&self.spec, *v, "stub", "partial").degraded())
            }
            Behavior::Delayed(delay, v) => {
                tokio::time::sleep(*delay).await;
                Ok(InstrumentMeasurement::observed(&self.spec, *v, "stub", "slow"))
            }
            Behavior::Fail(kind) => Err(InstrumentFailure::new(self.spec.name, *kind, "scripted")),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(InstrumentFailure::new(self.spec.name, FailureKind::NoData, "woke up"))
            }
            Behavior::Panic => panic!("scripted connector panic"),
        }
    }
}

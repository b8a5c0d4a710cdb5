//! Measurement Orchestrator
//!
//! Fans one request out to every instrument its environment selects, one task per
//! instrument, and joins them at a single point. Each task runs under its own
//! budget, `min(instrument timeout, remaining request deadline)`, so one slow
//! source never holds up the rest.
//!
//! # Outcomes
//! - Connector returns a measurement: kept as-is (evaluation happens later)
//! - Connector returns a failure: kept as-is
//! - Budget elapses or the request is cancelled: `timeout` failure
//! - Connector task panics: `degraded` failure carrying the panic message
//!
//! Instruments named by routing but absent from the registry are skipped and
//! never counted as queried. Tasks live in a `JoinSet`, so dropping the gather
//! future aborts every call still in flight.

use crate::connectors::InstrumentRegistry;
use crate::types::{
    BoundingBox, EnvironmentContext, FailureKind, InstrumentFailure, InstrumentMeasurement,
    InstrumentOutcome, TimeWindow,
};
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a single instrument task ended
enum TaskEnd {
    Finished(InstrumentOutcome),
    TimedOut,
    Cancelled,
    Panicked(String),
}

/// Concurrent instrument fan-out with per-instrument budgets
#[derive(Debug, Clone)]
pub struct MeasurementOrchestrator {
    registry: Arc<InstrumentRegistry>,
    request_deadline: Duration,
    time_window_days: u32,
}

impl MeasurementOrchestrator {
    pub fn new(
        registry: Arc<InstrumentRegistry>,
        request_deadline: Duration,
        time_window_days: u32,
    ) -> Self {
        Self {
            registry,
            request_deadline,
            time_window_days,
        }
    }

    pub fn registry(&self) -> &InstrumentRegistry {
        &self.registry
    }

    /// Query every selected instrument; never fails
    pub async fn gather(
        &self,
        bbox: &BoundingBox,
        context: &EnvironmentContext,
    ) -> (Vec<InstrumentMeasurement>, Vec<InstrumentFailure>) {
        self.gather_with_cancel(bbox, context, &CancellationToken::new())
            .await
    }

    /// `gather` that abandons in-flight calls when `cancel` fires
    ///
    /// Abandoned calls are recorded as `timeout` failures.
    pub async fn gather_with_cancel(
        &self,
        bbox: &BoundingBox,
        context: &EnvironmentContext,
        cancel: &CancellationToken,
    ) -> (Vec<InstrumentMeasurement>, Vec<InstrumentFailure>) {
        let deadline = Instant::now() + self.request_deadline;
        let window = TimeWindow::last_days(self.time_window_days, Utc::now());

        let mut tasks = JoinSet::new();
        let mut pending: Vec<(&'static str, Duration)> = Vec::new();
        for name in context.selected_instruments() {
            let Some(connector) = self.registry.get(&name) else {
                warn!(instrument = %name, "Routed instrument is not registered; skipping");
                continue;
            };

            let connector = Arc::clone(connector);
            let instrument = connector.name();
            let budget = self
                .registry
                .timeout_for(instrument)
                .min(deadline.saturating_duration_since(Instant::now()));
            let bbox = *bbox;
            let cancel = cancel.clone();

            tasks.spawn(async move {
                // Panics are caught here so the task still reports which instrument it was
                let call = AssertUnwindSafe(async move {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => TaskEnd::Cancelled,
                        result = tokio::time::timeout(budget, connector.measure(&bbox, &window)) => {
                            match result {
                                Ok(outcome) => TaskEnd::Finished(outcome),
                                Err(_) => TaskEnd::TimedOut,
                            }
                        }
                    }
                })
                .catch_unwind();
                let end = match call.await {
                    Ok(end) => end,
                    Err(payload) => TaskEnd::Panicked(panic_message(payload.as_ref())),
                };
                (instrument, budget, end)
            });
            pending.push((instrument, budget));
        }

        let queried = pending.len();
        let mut joined = Vec::with_capacity(queried);
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok((instrument, budget, end)) => {
                    pending.retain(|(name, _)| *name != instrument);
                    joined.push(to_outcome(instrument, budget, end));
                }
                Err(e) => warn!(error = %e, "Instrument task ended without a result"),
            }
        }
        // Tasks torn down by the runtime still owe their instrument an outcome
        for (instrument, budget) in pending {
            joined.push(Err(InstrumentFailure::new(
                instrument,
                FailureKind::Degraded,
                format!("Connector task aborted within {} ms budget", budget.as_millis()),
            )));
        }

        let mut measurements = Vec::new();
        let mut failures = Vec::new();
        for outcome in joined {
            match outcome {
                Ok(measurement) => {
                    debug!(
                        instrument = %measurement.instrument,
                        value = measurement.value,
                        unit = %measurement.unit,
                        "Instrument responded"
                    );
                    measurements.push(measurement);
                }
                Err(failure) => {
                    warn!(
                        instrument = %failure.instrument,
                        kind = failure.kind.as_str(),
                        reason = %failure.reason,
                        "Instrument failed"
                    );
                    failures.push(failure);
                }
            }
        }

        measurements.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        failures.sort_by(|a, b| a.instrument.cmp(&b.instrument));

        info!(
            environment = %context.environment,
            queried,
            responded = measurements.len(),
            failed = failures.len(),
            "Measurement fan-out complete"
        );
        (measurements, failures)
    }
}

/// Collapse a joined task into the instrument's single outcome
fn to_outcome(instrument: &'static str, budget: Duration, end: TaskEnd) -> InstrumentOutcome {
    match end {
        TaskEnd::Finished(Ok(mut measurement)) => {
            // The registry key owns the identity slot
            if measurement.instrument != instrument {
                debug!(
                    instrument,
                    reported = %measurement.instrument,
                    "Connector reported a different name; using registry key"
                );
                measurement.instrument = instrument.to_string();
            }
            Ok(measurement)
        }
        TaskEnd::Finished(Err(mut failure)) => {
            failure.instrument = instrument.to_string();
            Err(failure)
        }
        TaskEnd::TimedOut => Err(InstrumentFailure::new(
            instrument,
            FailureKind::Timeout,
            format!("No response within {} ms", budget.as_millis()),
        )),
        TaskEnd::Cancelled => Err(InstrumentFailure::new(
            instrument,
            FailureKind::Timeout,
            "Request cancelled before the instrument responded",
        )),
        TaskEnd::Panicked(message) => Err(InstrumentFailure::new(
            instrument,
            FailureKind::Degraded,
            format!("Connector panicked: {}", message),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

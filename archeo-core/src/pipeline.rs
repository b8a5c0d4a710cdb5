//! Analysis Pipeline
//!
//! The single inbound operation: `analyze(bbox, region_name?)`.
//!
//! # Flow
//! 1. Validate the bounding box (the only fatal failure; nothing is contacted)
//! 2. Classify the environment at the box centre and select instruments
//! 3. Fan out to the selected instruments under the request deadline
//! 4. Evaluate each measurement against its environment threshold
//! 5. Cross-reference the known-site catalog
//! 6. Decide the verdict
//! 7. Write the audit record; a write failure travels with the verdict
//!
//! Every collaborator is built once at start-up and shared read-only, so one
//! `AnalysisPipeline` serves any number of concurrent requests.

use crate::config::AnalysisConfig;
use crate::connectors::{InstrumentRegistry, RegistryError};
use crate::convergence::{decide, ConvergenceError};
use crate::db;
use crate::environment::EnvironmentClassifier;
use crate::evaluator::ThresholdTable;
use crate::known_sites::KnownSiteCatalog;
use crate::orchestrator::MeasurementOrchestrator;
use crate::types::{AnalysisRecord, BoundingBox, BoundingBoxError};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Reasons `analyze` returns no verdict at all
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// Rejected before any instrument was contacted
    #[error("Invalid bounding box: {0}")]
    InvalidBoundingBox(#[from] BoundingBoxError),

    /// Outcome set violated its own invariants
    #[error("Contract violation: {0}")]
    Contract(#[from] ConvergenceError),
}

/// Verdict plus the fate of its audit record
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub record: AnalysisRecord,
    /// Set when the record could not be stored; the record is still valid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence_error: Option<String>,
}

/// Audit database handle and its lock budget
#[derive(Debug, Clone)]
struct AuditStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

/// Shared, immutable analysis engine
#[derive(Debug, Clone)]
pub struct AnalysisPipeline {
    classifier: Arc<EnvironmentClassifier>,
    orchestrator: MeasurementOrchestrator,
    thresholds: Arc<ThresholdTable>,
    known_sites: Arc<KnownSiteCatalog>,
    audit: Option<AuditStore>,
}

impl AnalysisPipeline {
    /// Pipeline over explicit collaborators, without an audit database
    pub fn new(
        classifier: EnvironmentClassifier,
        orchestrator: MeasurementOrchestrator,
        thresholds: ThresholdTable,
        known_sites: KnownSiteCatalog,
    ) -> Self {
        Self {
            classifier: Arc::new(classifier),
            orchestrator,
            thresholds: Arc::new(thresholds),
            known_sites: Arc::new(known_sites),
            audit: None,
        }
    }

    /// Record every analysis in `pool`
    pub fn with_database(mut self, pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        self.audit = Some(AuditStore {
            pool,
            max_lock_wait_ms,
        });
        self
    }

    /// Build the production pipeline: built-in connectors, thresholds and catalog
    pub fn from_config(config: &AnalysisConfig) -> Result<Self, RegistryError> {
        let registry = InstrumentRegistry::from_config(config)?;
        let thresholds = ThresholdTable::from_specs(registry.specs(), &config.threshold_overrides);
        let known_sites = KnownSiteCatalog::load(config.known_sites_path.as_deref());
        let orchestrator = MeasurementOrchestrator::new(
            Arc::new(registry),
            config.request_deadline(),
            config.time_window_days,
        );

        Ok(Self::new(
            EnvironmentClassifier::default(),
            orchestrator,
            thresholds,
            known_sites,
        ))
    }

    pub fn classifier(&self) -> &EnvironmentClassifier {
        &self.classifier
    }

    pub fn known_sites(&self) -> &KnownSiteCatalog {
        &self.known_sites
    }

    pub fn thresholds(&self) -> &ThresholdTable {
        &self.thresholds
    }

    /// Analyze one area; always yields a verdict for a valid box
    pub async fn analyze(
        &self,
        bbox: BoundingBox,
        region_name: Option<&str>,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        self.analyze_with_cancel(bbox, region_name, &CancellationToken::new())
            .await
    }

    /// `analyze` that stops waiting on instruments when `cancel` fires
    ///
    /// Instruments still running at cancellation are recorded as timeouts and the
    /// verdict is decided from whatever already arrived.
    pub async fn analyze_with_cancel(
        &self,
        bbox: BoundingBox,
        region_name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        bbox.validate()?;

        let analysis_id = Uuid::new_v4();
        info!(
            analysis_id = %analysis_id,
            lat_min = bbox.lat_min,
            lat_max = bbox.lat_max,
            lon_min = bbox.lon_min,
            lon_max = bbox.lon_max,
            region = region_name.unwrap_or("-"),
            "Analysis started"
        );

        let (lat, lon) = bbox.center();
        let environment = self.classifier.classify(lat, lon);
        info!(
            analysis_id = %analysis_id,
            environment = %environment.environment,
            confidence = environment.confidence,
            primary = environment.primary_instruments.len(),
            secondary = environment.secondary_instruments.len(),
            minimum_required = environment.minimum_required,
            "Environment selected"
        );

        let (raw, failures) = self
            .orchestrator
            .gather_with_cancel(&bbox, &environment, cancel)
            .await;
        let measurements = self.thresholds.evaluate_all(&raw, &environment);

        let known_site = self.known_sites.find_overlap(&bbox);
        if let Some(site) = &known_site {
            debug!(
                analysis_id = %analysis_id,
                site = %site.name,
                distance_m = site.distance_m,
                contained = site.is_contained,
                "Known site nearby"
            );
        }

        let verdict = decide(&measurements, &failures, &environment, known_site.as_ref())?;
        info!(
            analysis_id = %analysis_id,
            classification = verdict.classification.as_str(),
            probability = verdict.archaeological_probability,
            converging = verdict.instruments_converging,
            required = verdict.minimum_required,
            responded = verdict.instruments_responded,
            queried = verdict.instruments_queried,
            "Verdict reached"
        );

        let record = AnalysisRecord {
            analysis_id,
            region_name: region_name.map(str::to_string),
            bbox,
            environment,
            measurements,
            failures,
            verdict,
            created_at: Utc::now(),
        };

        let persistence_error = self.persist(&record).await;
        Ok(AnalysisOutcome {
            record,
            persistence_error,
        })
    }

    async fn persist(&self, record: &AnalysisRecord) -> Option<String> {
        let Some(audit) = &self.audit else {
            debug!(analysis_id = %record.analysis_id, "No audit database configured");
            return None;
        };

        match db::save_analysis(&audit.pool, record, audit.max_lock_wait_ms).await {
            Ok(_) => None,
            Err(e) => {
                error!(
                    analysis_id = %record.analysis_id,
                    error = %e,
                    "Failed to record analysis"
                );
                Some(e.to_string())
            }
        }
    }
}

//! Analysis record persistence
//!
//! An analysis is written once, together with all of its measurement rows, in a
//! single transaction. Failures are stored in the same table as measurements
//! (`mode = 'failed'`) so each instrument occupies exactly one row per analysis.

use crate::types::{
    AnalysisRecord, BoundingBox, ConfidenceTier, ConvergenceVerdict, EnvironmentContext,
    FailureKind, InstrumentFailure, InstrumentMeasurement, MeasurementMode,
};
use archeo_common::db::retry_on_lock;
use archeo_common::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Flattened `analyses` row
struct AnalysisRow {
    analysis_id: String,
    region_name: Option<String>,
    bbox: BoundingBox,
    environment: &'static str,
    environment_json: String,
    classification: &'static str,
    probability: f64,
    verdict_json: String,
    created_at: String,
}

/// Flattened `measurements` row; success columns or failure columns are set
#[derive(Default)]
struct MeasurementRow {
    instrument: String,
    mode: &'static str,
    kind: Option<String>,
    value: Option<f64>,
    unit: Option<String>,
    threshold: Option<f64>,
    exceeds_threshold: Option<bool>,
    confidence: Option<&'static str>,
    note: Option<String>,
    source: Option<String>,
    acquired_at: Option<String>,
    failure_kind: Option<&'static str>,
    reason: Option<String>,
}

fn mode_str(mode: MeasurementMode) -> &'static str {
    match mode {
        MeasurementMode::Real => "real",
        MeasurementMode::Degraded => "degraded",
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    // Fixed-width UTC so text order is time order
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

fn to_json<T: serde::Serialize>(what: &str, value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize {}: {}", what, e)))
}

fn from_json<T: serde::de::DeserializeOwned>(what: &str, value: &str) -> Result<T> {
    serde_json::from_str(value)
        .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", what, e)))
}

/// Record a completed analysis
///
/// Fails if an analysis with the same id already exists; nothing is overwritten.
/// Lock contention is retried with backoff for up to `max_lock_wait_ms`.
pub async fn save_analysis(
    pool: &SqlitePool,
    record: &AnalysisRecord,
    max_lock_wait_ms: u64,
) -> Result<Uuid> {
    // Prepare all data BEFORE acquiring a connection
    let analysis = AnalysisRow {
        analysis_id: record.analysis_id.to_string(),
        region_name: record.region_name.clone(),
        bbox: record.bbox,
        environment: record.environment.environment.as_str(),
        environment_json: to_json("environment", &record.environment)?,
        classification: record.verdict.classification.as_str(),
        probability: record.verdict.archaeological_probability,
        verdict_json: to_json("verdict", &record.verdict)?,
        created_at: timestamp(&record.created_at),
    };

    let mut rows: Vec<MeasurementRow> = record
        .measurements
        .iter()
        .map(|m| MeasurementRow {
            instrument: m.instrument.clone(),
            mode: mode_str(m.mode),
            kind: Some(m.kind.clone()),
            value: Some(m.value),
            unit: Some(m.unit.clone()),
            threshold: Some(m.threshold),
            exceeds_threshold: Some(m.exceeds_threshold),
            confidence: Some(m.confidence.as_str()),
            note: Some(m.note.clone()),
            source: Some(m.source.clone()),
            acquired_at: m.acquired_at.as_ref().map(timestamp),
            ..MeasurementRow::default()
        })
        .collect();
    rows.extend(record.failures.iter().map(|f| MeasurementRow {
        instrument: f.instrument.clone(),
        mode: "failed",
        failure_kind: Some(f.kind.as_str()),
        reason: Some(f.reason.clone()),
        ..MeasurementRow::default()
    }));

    let result = retry_on_lock("save analysis", max_lock_wait_ms, || {
        insert_once(pool, &analysis, &rows)
    })
    .await;

    match result {
        Ok(()) => {
            tracing::debug!(
                analysis_id = %record.analysis_id,
                rows = rows.len(),
                "Analysis recorded"
            );
            Ok(record.analysis_id)
        }
        Err(Error::Database(e)) if is_unique_violation(&e) => Err(Error::InvalidInput(format!(
            "analysis {} is already recorded",
            record.analysis_id
        ))),
        Err(e) => Err(e),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map_or(false, |db| db.is_unique_violation())
}

async fn insert_once(
    pool: &SqlitePool,
    analysis: &AnalysisRow,
    rows: &[MeasurementRow],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO analyses (
            analysis_id, region_name,
            lat_min, lat_max, lon_min, lon_max, depth_min, depth_max,
            environment, environment_json, classification, probability,
            verdict_json, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&analysis.analysis_id)
    .bind(&analysis.region_name)
    .bind(analysis.bbox.lat_min)
    .bind(analysis.bbox.lat_max)
    .bind(analysis.bbox.lon_min)
    .bind(analysis.bbox.lon_max)
    .bind(analysis.bbox.depth_min)
    .bind(analysis.bbox.depth_max)
    .bind(analysis.environment)
    .bind(&analysis.environment_json)
    .bind(analysis.classification)
    .bind(analysis.probability)
    .bind(&analysis.verdict_json)
    .bind(&analysis.created_at)
    .execute(&mut *tx)
    .await?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO measurements (
                analysis_id, instrument, mode,
                kind, value, unit, threshold, exceeds_threshold, confidence,
                note, source, acquired_at, failure_kind, reason
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&analysis.analysis_id)
        .bind(&row.instrument)
        .bind(row.mode)
        .bind(&row.kind)
        .bind(row.value)
        .bind(&row.unit)
        .bind(row.threshold)
        .bind(row.exceeds_threshold)
        .bind(row.confidence)
        .bind(&row.note)
        .bind(&row.source)
        .bind(&row.acquired_at)
        .bind(row.failure_kind)
        .bind(&row.reason)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Load one analysis with all of its measurements and failures
pub async fn get_analysis(pool: &SqlitePool, analysis_id: Uuid) -> Result<Option<AnalysisRecord>> {
    let id = analysis_id.to_string();

    let row = sqlx::query(
        r#"
        SELECT analysis_id, region_name,
               lat_min, lat_max, lon_min, lon_max, depth_min, depth_max,
               environment_json, verdict_json, created_at
        FROM analyses
        WHERE analysis_id = ?
        "#,
    )
    .bind(&id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let bbox = BoundingBox {
        lat_min: row.get("lat_min"),
        lat_max: row.get("lat_max"),
        lon_min: row.get("lon_min"),
        lon_max: row.get("lon_max"),
        depth_min: row.get("depth_min"),
        depth_max: row.get("depth_max"),
    };
    let environment: EnvironmentContext =
        from_json("environment", &row.get::<String, _>("environment_json"))?;
    let verdict: ConvergenceVerdict = from_json("verdict", &row.get::<String, _>("verdict_json"))?;
    let created_at = parse_timestamp("created_at", &row.get::<String, _>("created_at"))?;

    let rows = sqlx::query(
        r#"
        SELECT instrument, mode, kind, value, unit, threshold, exceeds_threshold,
               confidence, note, source, acquired_at, failure_kind, reason
        FROM measurements
        WHERE analysis_id = ?
        ORDER BY instrument
        "#,
    )
    .bind(&id)
    .fetch_all(pool)
    .await?;

    let mut measurements = Vec::new();
    let mut failures = Vec::new();
    for row in &rows {
        match row.get::<String, _>("mode").as_str() {
            "failed" => failures.push(failure_from_row(row)?),
            mode => measurements.push(measurement_from_row(row, mode)?),
        }
    }

    Ok(Some(AnalysisRecord {
        analysis_id,
        region_name: row.get("region_name"),
        bbox,
        environment,
        measurements,
        failures,
        verdict,
        created_at,
    }))
}

fn measurement_from_row(row: &SqliteRow, mode: &str) -> Result<InstrumentMeasurement> {
    let mode = match mode {
        "real" => MeasurementMode::Real,
        "degraded" => MeasurementMode::Degraded,
        other => return Err(Error::Internal(format!("Unknown measurement mode '{}'", other))),
    };
    let confidence: Option<String> = row.get("confidence");
    let confidence = confidence
        .as_deref()
        .unwrap_or("none")
        .parse::<ConfidenceTier>()
        .map_err(Error::Internal)?;
    let acquired_at: Option<String> = row.get("acquired_at");
    let acquired_at = acquired_at
        .map(|s| parse_timestamp("acquired_at", &s))
        .transpose()?;

    Ok(InstrumentMeasurement {
        instrument: row.get("instrument"),
        kind: row.get::<Option<String>, _>("kind").unwrap_or_default(),
        value: row.get::<Option<f64>, _>("value").unwrap_or(f64::NAN),
        unit: row.get::<Option<String>, _>("unit").unwrap_or_default(),
        threshold: row.get::<Option<f64>, _>("threshold").unwrap_or(f64::NAN),
        exceeds_threshold: row
            .get::<Option<bool>, _>("exceeds_threshold")
            .unwrap_or(false),
        confidence,
        mode,
        note: row.get::<Option<String>, _>("note").unwrap_or_default(),
        source: row.get::<Option<String>, _>("source").unwrap_or_default(),
        acquired_at,
    })
}

fn failure_from_row(row: &SqliteRow) -> Result<InstrumentFailure> {
    let kind: Option<String> = row.get("failure_kind");
    let kind = kind
        .as_deref()
        .unwrap_or("degraded")
        .parse::<FailureKind>()
        .map_err(Error::Internal)?;
    Ok(InstrumentFailure {
        instrument: row.get("instrument"),
        kind,
        reason: row.get::<Option<String>, _>("reason").unwrap_or_default(),
    })
}

async fn load_all(pool: &SqlitePool, ids: Vec<String>) -> Result<Vec<AnalysisRecord>> {
    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        let uuid = Uuid::parse_str(&id)
            .map_err(|e| Error::Internal(format!("Invalid analysis id '{}': {}", id, e)))?;
        if let Some(record) = get_analysis(pool, uuid).await? {
            records.push(record);
        }
    }
    Ok(records)
}

/// Most recent analyses, newest first
pub async fn list_recent(pool: &SqlitePool, limit: u32) -> Result<Vec<AnalysisRecord>> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT analysis_id FROM analyses ORDER BY created_at DESC, rowid DESC LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    load_all(pool, ids).await
}

/// All analyses of one named region, newest first
pub async fn list_by_region(pool: &SqlitePool, region_name: &str) -> Result<Vec<AnalysisRecord>> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT analysis_id FROM analyses
        WHERE region_name = ?
        ORDER BY created_at DESC, rowid DESC
        "#,
    )
    .bind(region_name)
    .fetch_all(pool)
    .await?;

    load_all(pool, ids).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_tables;
    use crate::types::{Classification, EnvironmentType, RecommendedAction};
    use chrono::{Duration, TimeZone};

    async fn setup() -> SqlitePool {
        let pool = archeo_common::db::open_memory_pool().await.unwrap();
        init_tables(&pool).await.unwrap();
        pool
    }

    fn measurement(instrument: &str, value: f64, mode: MeasurementMode) -> InstrumentMeasurement {
        InstrumentMeasurement {
            instrument: instrument.into(),
            kind: "thermal".into(),
            value,
            unit: "K".into(),
            threshold: 1.5,
            exceeds_threshold: value > 1.5,
            confidence: if value > 1.5 {
                ConfidenceTier::Moderate
            } else {
                ConfidenceTier::None
            },
            mode,
            note: "centre vs ring".into(),
            source: "test".into(),
            acquired_at: Some(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()),
        }
    }

    fn record(region: Option<&str>, created_at: DateTime<Utc>) -> AnalysisRecord {
        let measurements = vec![
            measurement("modis_thermal", 2.3, MeasurementMode::Real),
            measurement("srtm_elevation", 0.4, MeasurementMode::Degraded),
        ];
        AnalysisRecord {
            analysis_id: Uuid::new_v4(),
            region_name: region.map(str::to_string),
            bbox: BoundingBox::around(29.975, 31.138, 0.01).unwrap(),
            environment: EnvironmentContext {
                environment: EnvironmentType::Desert,
                confidence: 0.9,
                primary_instruments: vec!["modis_thermal".into(), "srtm_elevation".into()],
                secondary_instruments: vec!["sentinel1_sar".into()],
                minimum_required: 2,
            },
            measurements: measurements.clone(),
            failures: vec![InstrumentFailure::new(
                "sentinel1_sar",
                FailureKind::AuthError,
                "no credentials configured",
            )],
            verdict: ConvergenceVerdict {
                anomaly_detected: false,
                classification: Classification::Natural,
                archaeological_probability: 0.15,
                confidence_level: ConfidenceTier::Moderate,
                instruments_converging: 1,
                minimum_required: 2,
                instruments_queried: 3,
                instruments_responded: 2,
                recommended_action: RecommendedAction::None,
                contributing: vec![measurements[0].clone()],
                known_site: None,
            },
            created_at,
        }
    }

    #[tokio::test]
    async fn test_round_trip_with_successes_and_failures() {
        let pool = setup().await;
        let original = record(Some("Giza"), Utc.with_ymd_and_hms(2024, 6, 2, 8, 30, 0).unwrap());

        let id = save_analysis(&pool, &original, 1000).await.unwrap();
        let loaded = get_analysis(&pool, id).await.unwrap().unwrap();

        assert_eq!(loaded, original);
        assert_eq!(loaded.failures[0].kind, FailureKind::AuthError);
        assert_eq!(loaded.measurements[1].mode, MeasurementMode::Degraded);
    }

    #[tokio::test]
    async fn test_failed_rows_use_failed_mode() {
        let pool = setup().await;
        let original = record(None, Utc::now());
        save_analysis(&pool, &original, 1000).await.unwrap();

        let modes: Vec<String> =
            sqlx::query_scalar("SELECT mode FROM measurements ORDER BY instrument")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(modes, vec!["real", "failed", "degraded"]);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected_without_partial_rows() {
        let pool = setup().await;
        let original = record(None, Utc::now());
        save_analysis(&pool, &original, 1000).await.unwrap();

        let again = save_analysis(&pool, &original, 1000).await;
        assert!(again.is_err());

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM measurements")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 3);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let pool = setup().await;
        assert!(get_analysis(&pool, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_listing_is_newest_first() {
        let pool = setup().await;
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let oldest = record(Some("Giza"), base);
        let middle = record(Some("Nazca"), base + Duration::hours(1));
        let newest = record(Some("Giza"), base + Duration::hours(2));
        for r in [&middle, &oldest, &newest] {
            save_analysis(&pool, r, 1000).await.unwrap();
        }

        let recent = list_recent(&pool, 2).await.unwrap();
        let ids: Vec<Uuid> = recent.iter().map(|r| r.analysis_id).collect();
        assert_eq!(ids, vec![newest.analysis_id, middle.analysis_id]);

        let giza = list_by_region(&pool, "Giza").await.unwrap();
        let ids: Vec<Uuid> = giza.iter().map(|r| r.analysis_id).collect();
        assert_eq!(ids, vec![newest.analysis_id, oldest.analysis_id]);

        assert!(list_by_region(&pool, "Petra").await.unwrap().is_empty());
    }
}

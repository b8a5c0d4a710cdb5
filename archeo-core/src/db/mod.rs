//! Analysis audit database
//!
//! Every `analyze` call leaves one row in `analyses` plus one row per queried
//! instrument in `measurements`, successes and failures alike.

pub mod analyses;

use archeo_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

pub use analyses::{get_analysis, list_by_region, list_recent, save_analysis};

/// Open the audit database and make sure its tables exist
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    tracing::debug!("Connecting to database: {}", db_path.display());
    let pool = archeo_common::db::open_pool(db_path).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create the audit tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analyses (
            analysis_id TEXT PRIMARY KEY,
            region_name TEXT,
            lat_min REAL NOT NULL,
            lat_max REAL NOT NULL,
            lon_min REAL NOT NULL,
            lon_max REAL NOT NULL,
            depth_min REAL,
            depth_max REAL,
            environment TEXT NOT NULL,
            environment_json TEXT NOT NULL,
            classification TEXT NOT NULL,
            probability REAL NOT NULL,
            verdict_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS measurements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            analysis_id TEXT NOT NULL REFERENCES analyses(analysis_id) ON DELETE CASCADE,
            instrument TEXT NOT NULL,
            mode TEXT NOT NULL CHECK (mode IN ('real', 'degraded', 'failed')),
            kind TEXT,
            value REAL,
            unit TEXT,
            threshold REAL,
            exceeds_threshold INTEGER,
            confidence TEXT,
            note TEXT,
            source TEXT,
            acquired_at TEXT,
            failure_kind TEXT,
            reason TEXT,
            UNIQUE (analysis_id, instrument)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_analyses_created ON analyses(created_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_analyses_region ON analyses(region_name)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (analyses, measurements)");

    Ok(())
}

//! archeo-core - one-shot anomaly analysis
//!
//! Loads configuration, analyzes a single bounding box and prints the resulting
//! analysis record as JSON on stdout. Logs go to stderr.
//!
//! ```text
//! archeo-core --lat-min 29.96 --lat-max 29.99 --lon-min 31.12 --lon-max 31.15 --region Giza
//! ```

use anyhow::{Context, Result};
use archeo_core::config::AnalysisConfig;
use archeo_core::db;
use archeo_core::pipeline::AnalysisPipeline;
use archeo_core::types::BoundingBox;
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Command-line arguments for archeo-core
#[derive(Parser, Debug)]
#[command(name = "archeo-core")]
#[command(about = "Multi-instrument archaeological anomaly analysis for one area")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "ARCHEO_CONFIG")]
    config: Option<PathBuf>,

    /// Southern edge, degrees
    #[arg(long, allow_hyphen_values = true)]
    lat_min: f64,

    /// Northern edge, degrees
    #[arg(long, allow_hyphen_values = true)]
    lat_max: f64,

    /// Western edge, degrees
    #[arg(long, allow_hyphen_values = true)]
    lon_min: f64,

    /// Eastern edge, degrees
    #[arg(long, allow_hyphen_values = true)]
    lon_max: f64,

    /// Shallowest depth, metres (requires --depth-max)
    #[arg(long, allow_hyphen_values = true, requires = "depth_max")]
    depth_min: Option<f64>,

    /// Deepest depth, metres (requires --depth-min)
    #[arg(long, allow_hyphen_values = true, requires = "depth_min")]
    depth_max: Option<f64>,

    /// Region label stored with the analysis
    #[arg(short, long)]
    region: Option<String>,

    /// Do not write the analysis to the audit database
    #[arg(long)]
    no_audit: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = AnalysisConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    archeo_common::config::init_tracing(&config.logging)?;

    info!("Starting archeo-core {}", env!("CARGO_PKG_VERSION"));

    let mut bbox = BoundingBox::new(args.lat_min, args.lat_max, args.lon_min, args.lon_max)
        .context("Invalid bounding box")?;
    if let (Some(depth_min), Some(depth_max)) = (args.depth_min, args.depth_max) {
        bbox = bbox
            .with_depth(depth_min, depth_max)
            .context("Invalid depth range")?;
    }

    let mut pipeline =
        AnalysisPipeline::from_config(&config).context("Failed to build instrument registry")?;

    if !args.no_audit {
        let db_path = config.database_path();
        info!("Database: {}", db_path.display());
        let pool = db::init_database_pool(&db_path)
            .await
            .context("Failed to open audit database")?;
        pipeline = pipeline.with_database(pool, config.db_max_lock_wait_ms);
    }

    // Ctrl+C stops waiting on instruments; the verdict is still produced
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, abandoning outstanding instruments");
            trigger.cancel();
        }
    });

    let outcome = pipeline
        .analyze_with_cancel(bbox, args.region.as_deref(), &cancel)
        .await?;

    if let Some(e) = &outcome.persistence_error {
        warn!("Analysis was not recorded: {}", e);
    }

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

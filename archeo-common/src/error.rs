//! Error type shared by the analysis pipeline and its audit store
//!
//! Instrument problems never surface here: connectors report those as
//! per-instrument failures inside the analysis result. These variants cover the
//! few things that stop an analysis outright.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Audit trail store unreachable, locked past retries, or a query failed
    #[cfg(feature = "sqlx")]
    #[error("Audit store error: {0}")]
    Database(#[from] sqlx::Error),

    /// Reading the config file, site catalog, or database directory
    #[error("File access error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file unreadable or holding out-of-range settings
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Rejected analysis request (bad bounding box, duplicate analysis id)
    #[error("Invalid analysis request: {0}")]
    InvalidInput(String),

    /// Stored record that no longer decodes, or another broken invariant
    #[error("Internal error: {0}")]
    Internal(String),
}

//! # Archeo Common Library
//!
//! Shared code for the archeo workspace:
//! - Common error type
//! - Configuration file resolution and logging setup
//! - Geodesy helpers (great-circle distance, degree lengths)
//! - SQLite pool setup and lock retry

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod geo;

pub use error::{Error, Result};

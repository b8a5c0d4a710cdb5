//! archeo-core library
//!
//! Multi-instrument remote sensing analysis of one geographic area: classify the
//! environment, query the instruments that suit it in parallel, evaluate each
//! measurement against an environment-specific threshold, and decide whether
//! enough independent instruments converge to call the area an anomaly.
//!
//! Entry point: [`pipeline::AnalysisPipeline::analyze`].

pub mod config;
pub mod connectors;
pub mod convergence;
pub mod db;
pub mod environment;
pub mod evaluator;
pub mod known_sites;
pub mod orchestrator;
pub mod pipeline;
pub mod types;

pub use crate::config::AnalysisConfig;
pub use crate::pipeline::{AnalysisError, AnalysisOutcome, AnalysisPipeline};

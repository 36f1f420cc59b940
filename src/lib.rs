//! Synheart Cohort - Correlation, baseline and anomaly analysis for wearable health cohorts
//!
//! Cohort takes cleaned per-participant time series and computes cross-metric
//! correlations, personal baselines, anomaly episodes and recovery profiles:
//! validation → baselines → correlations → anomalies → recovery, per
//! participant in parallel, followed by a cohort-level correlation reduction.
//!
//! ## Modules
//!
//! - **Input**: `store` holds the cleaned series, `types` the shared data model
//! - **Analysis**: `baseline`, `correlation`, `anomaly`, `recovery` built on
//!   `stats` and `alignment`
//! - **Orchestration**: `pipeline` runs the batch and builds the report

pub mod alignment;
pub mod anomaly;
pub mod baseline;
pub mod config;
pub mod correlation;
pub mod error;
pub mod pipeline;
pub mod recovery;
pub mod stats;
pub mod store;
pub mod types;

pub use anomaly::AnomalyDetector;
pub use baseline::BaselineModel;
pub use config::EngineConfig;
pub use correlation::CorrelationEngine;
pub use error::{EngineError, StatError};
pub use pipeline::{analyze_cohort, AbortHandle, AnalysisEngine, AnalysisReport};
pub use recovery::RecoveryAnalyzer;
pub use store::TimeSeriesStore;
pub use types::{MetricPair, MetricType, ParticipantSeries, Sample};

/// Engine version embedded in every report
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "synheart-cohort";

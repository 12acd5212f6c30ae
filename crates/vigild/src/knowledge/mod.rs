//! Knowledge base: collection, correlation, scoring and snapshot publication.
//!
//! One build cycle lists services, fetches their metrics in bounded batches,
//! lists problems, correlates and scores, then publishes a new immutable
//! [`Snapshot`](vigil_common::Snapshot) with a single reference swap.

pub mod base;
pub mod builder;
pub mod collector;
pub mod correlate;

pub use base::{KnowledgeBase, RefreshHandle};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which single upstream call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ListServices,
    ListProblems,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::ListServices => write!(f, "service list"),
            Stage::ListProblems => write!(f, "problem list"),
        }
    }
}

/// A build cycle that did not publish
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollectionError {
    /// Service or problem listing failed; the previous snapshot stays published
    #[error("{stage} fetch failed: {message}")]
    Fatal { stage: Stage, message: String },

    /// The build task ended without producing an outcome
    #[error("build aborted: {message}")]
    Aborted { message: String },
}

/// One service whose metric fetch failed during a cycle
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("metrics for {service_id} unavailable: {message}")]
pub struct PartialMetricError {
    pub service_id: String,
    pub message: String,
    /// Previous cycle's metrics were kept for this service
    pub retained: bool,
}

/// Summary of a published build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub generation: u64,
    pub built_at: DateTime<Utc>,
    pub service_count: usize,
    pub problem_count: usize,
    pub partial_failures: Vec<PartialMetricError>,
    pub elapsed_ms: u64,
}

/// Outcome shared by every caller joined to one build
pub type BuildOutcome = Result<BuildReport, CollectionError>;

//! Knowledge base status shared by the daemon and the control client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only view of the knowledge base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeStatus {
    /// A build is in flight
    pub building: bool,
    /// A snapshot has been published
    pub ready: bool,
    pub generation: u64,
    pub last_build_time: Option<DateTime<Utc>>,
    pub last_build_duration_ms: Option<u64>,
    pub service_count: usize,
    /// Message of the most recent failed cycle, cleared by the next success
    pub last_error: Option<String>,
    /// Name of the upstream data source
    pub source: String,
}

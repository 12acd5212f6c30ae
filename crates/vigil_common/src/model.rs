//! Service and problem records held by a snapshot.
//!
//! Records are built once per collection cycle and never mutated after the
//! snapshot holding them is published.

use crate::health::HealthStatus;
use crate::metric::Metric;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Upstream identity
// ============================================================================

/// One entry of the upstream service list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    /// Stable upstream identifier (e.g. `SERVICE-5A1B...`)
    pub id: String,
    pub display_name: String,
    /// Service kind/tag reported upstream (WEB_REQUEST, DATABASE, ...)
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub management_zones: Vec<String>,
}

fn default_kind() -> String {
    "Unknown".to_string()
}

impl ServiceIdentity {
    pub fn new(id: &str, display_name: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            kind: default_kind(),
            tags: Vec::new(),
            management_zones: Vec::new(),
        }
    }
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    Count,
    Milliseconds,
    Percent,
    RequestsPerMinute,
}

/// A single metric value with the unit and window it was computed over
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub value: f64,
    pub unit: MetricUnit,
    /// Window the value was aggregated over, e.g. "2h"
    pub window: String,
}

impl MetricValue {
    pub fn new(value: f64, unit: MetricUnit, window: &str) -> Self {
        Self {
            value,
            unit,
            window: window.to_string(),
        }
    }
}

/// Complete metric set for one service from one fetch.
///
/// Every field is mandatory: a set is either fetched whole or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    pub error_count: MetricValue,
    pub response_time: MetricValue,
    pub failure_rate: MetricValue,
    pub throughput: MetricValue,
    pub collected_at: DateTime<Utc>,
}

impl MetricSet {
    /// Build a set from raw values in the canonical units
    pub fn from_values(
        window: &str,
        error_count: f64,
        response_time_ms: f64,
        failure_rate_pct: f64,
        throughput_rpm: f64,
    ) -> Self {
        Self {
            error_count: MetricValue::new(error_count, MetricUnit::Count, window),
            response_time: MetricValue::new(response_time_ms, MetricUnit::Milliseconds, window),
            failure_rate: MetricValue::new(failure_rate_pct, MetricUnit::Percent, window),
            throughput: MetricValue::new(throughput_rpm, MetricUnit::RequestsPerMinute, window),
            collected_at: Utc::now(),
        }
    }
}

/// Where a record's metrics came from in the cycle that built it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MetricAvailability {
    /// Fetched during the cycle that built this record
    Fresh { metrics: MetricSet },
    /// Fetch failed this cycle; metrics retained whole from the previous cycle
    Stale { metrics: MetricSet, error: String },
    /// Fetch failed and no earlier metrics exist
    Unavailable { error: String },
}

impl MetricAvailability {
    pub fn metrics(&self) -> Option<&MetricSet> {
        match self {
            MetricAvailability::Fresh { metrics } | MetricAvailability::Stale { metrics, .. } => {
                Some(metrics)
            }
            MetricAvailability::Unavailable { .. } => None,
        }
    }

    /// True when this cycle's fetch failed
    pub fn is_degraded(&self) -> bool {
        !matches!(self, MetricAvailability::Fresh { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            MetricAvailability::Fresh { .. } => None,
            MetricAvailability::Stale { error, .. } | MetricAvailability::Unavailable { error } => {
                Some(error)
            }
        }
    }
}

// ============================================================================
// Problems
// ============================================================================

/// Upstream severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Availability,
    Error,
    Performance,
    ResourceContention,
    CustomAlert,
    MonitoringUnavailable,
    Info,
    #[serde(other)]
    Unknown,
}

impl Severity {
    /// Severities that carry the heavier per-problem penalty
    pub fn is_critical(&self) -> bool {
        matches!(self, Severity::Error | Severity::CustomAlert)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProblemState {
    Open,
    Closed,
}

/// One open or recent problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemRecord {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    /// Services named by the problem (root cause included)
    #[serde(default)]
    pub impacted_services: Vec<String>,
    /// Service designated as the problem's root cause, if any
    #[serde(default)]
    pub root_cause: Option<String>,
    pub started_at: DateTime<Utc>,
    pub state: ProblemState,
}

impl ProblemRecord {
    pub fn is_open(&self) -> bool {
        self.state == ProblemState::Open
    }

    /// Services named by the problem, root cause included, without duplicates
    pub fn named_services(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.impacted_services.iter().map(String::as_str).collect();
        if let Some(root) = &self.root_cause {
            ids.push(root.as_str());
        }
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// How a problem relates to the service it is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relevance {
    RootCause,
    DirectlyImpacted,
    Related,
}

/// Problem attached to a service record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemRef {
    pub problem_id: String,
    pub title: String,
    pub severity: Severity,
    pub state: ProblemState,
    pub relevance: Relevance,
}

impl ProblemRef {
    pub fn from_problem(problem: &ProblemRecord, relevance: Relevance) -> Self {
        Self {
            problem_id: problem.id.clone(),
            title: problem.title.clone(),
            severity: problem.severity,
            state: problem.state,
            relevance,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == ProblemState::Open
    }

    /// Root-cause or directly-impacted
    pub fn is_direct(&self) -> bool {
        self.relevance != Relevance::Related
    }
}

// ============================================================================
// Service record
// ============================================================================

/// Everything known about one service as of one collection cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: String,
    pub display_name: String,
    pub kind: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub management_zones: Vec<String>,
    pub metrics: MetricAvailability,
    /// Attached problems, ordered by relevance then problem id
    pub problems: Vec<ProblemRef>,
    /// 0-100, absent when no metrics are available
    pub health_score: Option<f64>,
    pub status: HealthStatus,
    pub updated_at: DateTime<Utc>,
}

impl ServiceRecord {
    /// Value of a metric for ranking and filtering, None when unavailable
    pub fn metric(&self, metric: Metric) -> Option<f64> {
        let set = self.metrics.metrics();
        match metric {
            Metric::ErrorCount => set.map(|m| m.error_count.value),
            Metric::ResponseTime => set.map(|m| m.response_time.value),
            Metric::FailureRate => set.map(|m| m.failure_rate.value),
            Metric::Throughput => set.map(|m| m.throughput.value),
            Metric::HealthScore => self.health_score,
            Metric::ProblemCount => Some(self.problem_count() as f64),
        }
    }

    /// Open problems naming this service directly
    pub fn problem_count(&self) -> usize {
        self.problems
            .iter()
            .filter(|p| p.is_open() && p.is_direct())
            .count()
    }

    pub fn has_problems(&self) -> bool {
        self.problem_count() > 0
    }

    /// Problems reached only through the impact chain
    pub fn related_problems(&self) -> impl Iterator<Item = &ProblemRef> {
        self.problems
            .iter()
            .filter(|p| p.relevance == Relevance::Related)
    }

    /// True when this record's identifier or display name matches `key`
    pub fn matches_key(&self, key: &str) -> bool {
        self.id == key || self.display_name.eq_ignore_ascii_case(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem(id: &str, impacted: &[&str], root: Option<&str>) -> ProblemRecord {
        ProblemRecord {
            id: id.to_string(),
            title: format!("problem {}", id),
            severity: Severity::Error,
            impacted_services: impacted.iter().map(|s| s.to_string()).collect(),
            root_cause: root.map(|s| s.to_string()),
            started_at: Utc::now(),
            state: ProblemState::Open,
        }
    }

    #[test]
    fn test_named_services_dedup_includes_root() {
        let p = problem("P-1", &["SERVICE-B", "SERVICE-A", "SERVICE-B"], Some("SERVICE-C"));
        assert_eq!(p.named_services(), vec!["SERVICE-A", "SERVICE-B", "SERVICE-C"]);
    }

    #[test]
    fn test_availability_accessors() {
        let set = MetricSet::from_values("2h", 5.0, 120.0, 0.5, 300.0);
        let fresh = MetricAvailability::Fresh { metrics: set.clone() };
        let stale = MetricAvailability::Stale {
            metrics: set,
            error: "timeout".to_string(),
        };
        let gone = MetricAvailability::Unavailable {
            error: "timeout".to_string(),
        };

        assert!(!fresh.is_degraded());
        assert!(stale.is_degraded());
        assert!(stale.metrics().is_some());
        assert!(gone.metrics().is_none());
        assert_eq!(gone.error(), Some("timeout"));
    }

    #[test]
    fn test_severity_parses_upstream_names() {
        let s: Severity = serde_json::from_str("\"RESOURCE_CONTENTION\"").unwrap();
        assert_eq!(s, Severity::ResourceContention);
        let s: Severity = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(s, Severity::Unknown);
        assert!(Severity::CustomAlert.is_critical());
        assert!(!Severity::Performance.is_critical());
    }
}

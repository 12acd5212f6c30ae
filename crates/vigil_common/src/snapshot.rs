//! Immutable snapshot of all service, problem and aggregate data from one
//! collection cycle.
//!
//! A snapshot is assembled once, wrapped in an `Arc`, and published whole.
//! Nothing in it changes afterwards; aggregate statistics are computed at
//! construction from the same records the snapshot holds.

use crate::health::HealthStatus;
use crate::model::{ProblemRecord, ServiceRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Precomputed statistics over every service in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total_services: usize,
    pub healthy_count: usize,
    pub warning_count: usize,
    pub critical_count: usize,
    /// Services with no metrics at all
    pub unknown_count: usize,
    pub healthy_percentage: f64,
    /// Averages cover services that have a value; None when none do
    pub avg_health_score: Option<f64>,
    pub avg_error_count: Option<f64>,
    pub avg_response_time: Option<f64>,
    pub avg_failure_rate: Option<f64>,
    pub avg_throughput: Option<f64>,
    /// Every problem record, including those naming no service
    pub total_problems: usize,
    pub open_problems: usize,
    /// Services with at least one open root-cause or directly-impacting problem
    pub services_with_problems: usize,
    /// Services whose metric fetch failed in the building cycle
    pub degraded_services: usize,
    pub built_at: DateTime<Utc>,
}

impl AggregateStats {
    pub fn compute<'a>(
        services: impl IntoIterator<Item = &'a ServiceRecord>,
        problems: &[ProblemRecord],
        built_at: DateTime<Utc>,
    ) -> Self {
        let mut stats = AggregateStats {
            total_services: 0,
            healthy_count: 0,
            warning_count: 0,
            critical_count: 0,
            unknown_count: 0,
            healthy_percentage: 0.0,
            avg_health_score: None,
            avg_error_count: None,
            avg_response_time: None,
            avg_failure_rate: None,
            avg_throughput: None,
            total_problems: problems.len(),
            open_problems: problems.iter().filter(|p| p.is_open()).count(),
            services_with_problems: 0,
            degraded_services: 0,
            built_at,
        };

        let mut health = Mean::default();
        let mut errors = Mean::default();
        let mut response = Mean::default();
        let mut failure = Mean::default();
        let mut throughput = Mean::default();

        for service in services {
            stats.total_services += 1;
            match service.status {
                HealthStatus::Healthy => stats.healthy_count += 1,
                HealthStatus::Warning => stats.warning_count += 1,
                HealthStatus::Critical => stats.critical_count += 1,
                HealthStatus::Unknown => stats.unknown_count += 1,
            }
            if service.has_problems() {
                stats.services_with_problems += 1;
            }
            if service.metrics.is_degraded() {
                stats.degraded_services += 1;
            }
            if let Some(score) = service.health_score {
                health.add(score);
            }
            if let Some(m) = service.metrics.metrics() {
                errors.add(m.error_count.value);
                response.add(m.response_time.value);
                failure.add(m.failure_rate.value);
                throughput.add(m.throughput.value);
            }
        }

        if stats.total_services > 0 {
            stats.healthy_percentage =
                stats.healthy_count as f64 / stats.total_services as f64 * 100.0;
        }
        stats.avg_health_score = health.value();
        stats.avg_error_count = errors.value();
        stats.avg_response_time = response.value();
        stats.avg_failure_rate = failure.value();
        stats.avg_throughput = throughput.value();
        stats
    }
}

#[derive(Default)]
struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    fn add(&mut self, v: f64) {
        self.sum += v;
        self.count += 1;
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// The unit of publication
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    generation: u64,
    built_at: DateTime<Utc>,
    services: BTreeMap<String, Arc<ServiceRecord>>,
    problems: Vec<ProblemRecord>,
    stats: AggregateStats,
}

impl Snapshot {
    /// Assemble a snapshot; aggregates are computed here and never again
    pub fn new(
        generation: u64,
        built_at: DateTime<Utc>,
        services: Vec<ServiceRecord>,
        problems: Vec<ProblemRecord>,
    ) -> Self {
        let services: BTreeMap<String, Arc<ServiceRecord>> = services
            .into_iter()
            .map(|s| (s.id.clone(), Arc::new(s)))
            .collect();
        let stats = AggregateStats::compute(services.values().map(Arc::as_ref), &problems, built_at);
        Self {
            generation,
            built_at,
            services,
            problems,
            stats,
        }
    }

    /// Monotonic build counter, 1 for the first published snapshot
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Services in identifier order
    pub fn services(&self) -> impl Iterator<Item = &Arc<ServiceRecord>> {
        self.services.values()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<ServiceRecord>> {
        self.services.get(id)
    }

    /// Resolve by identifier first, then by case-insensitive display name
    pub fn find(&self, key: &str) -> Option<&Arc<ServiceRecord>> {
        self.services
            .get(key)
            .or_else(|| self.services.values().find(|s| s.matches_key(key)))
    }

    pub fn problems(&self) -> &[ProblemRecord] {
        &self.problems
    }

    pub fn stats(&self) -> &AggregateStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetricAvailability, MetricSet, ProblemState, Severity};

    fn record(id: &str, name: &str, status: HealthStatus, score: Option<f64>) -> ServiceRecord {
        let metrics = match score {
            Some(_) => MetricAvailability::Fresh {
                metrics: MetricSet::from_values("2h", 10.0, 200.0, 1.0, 60.0),
            },
            None => MetricAvailability::Unavailable {
                error: "timeout".to_string(),
            },
        };
        ServiceRecord {
            id: id.to_string(),
            display_name: name.to_string(),
            kind: "WEB_REQUEST".to_string(),
            tags: vec![],
            management_zones: vec![],
            metrics,
            problems: vec![],
            health_score: score,
            status,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_services_ordered_by_id() {
        let snap = Snapshot::new(
            1,
            Utc::now(),
            vec![
                record("SERVICE-C", "checkout", HealthStatus::Healthy, Some(100.0)),
                record("SERVICE-A", "auth", HealthStatus::Healthy, Some(100.0)),
            ],
            vec![],
        );
        let ids: Vec<&str> = snap.services().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["SERVICE-A", "SERVICE-C"]);
    }

    #[test]
    fn test_find_by_display_name() {
        let snap = Snapshot::new(
            1,
            Utc::now(),
            vec![record("SERVICE-A", "OrderController", HealthStatus::Healthy, Some(90.0))],
            vec![],
        );
        assert!(snap.find("ordercontroller").is_some());
        assert!(snap.find("SERVICE-A").is_some());
        assert!(snap.find("missing").is_none());
    }

    #[test]
    fn test_stats_counts_and_averages() {
        let orphan = ProblemRecord {
            id: "P-9".to_string(),
            title: "host disk full".to_string(),
            severity: Severity::ResourceContention,
            impacted_services: vec![],
            root_cause: None,
            started_at: Utc::now(),
            state: ProblemState::Open,
        };
        let snap = Snapshot::new(
            3,
            Utc::now(),
            vec![
                record("SERVICE-A", "a", HealthStatus::Healthy, Some(100.0)),
                record("SERVICE-B", "b", HealthStatus::Critical, Some(40.0)),
                record("SERVICE-C", "c", HealthStatus::Unknown, None),
            ],
            vec![orphan],
        );
        let stats = snap.stats();
        assert_eq!(stats.total_services, 3);
        assert_eq!(stats.healthy_count, 1);
        assert_eq!(stats.critical_count, 1);
        assert_eq!(stats.unknown_count, 1);
        assert_eq!(stats.degraded_services, 1);
        assert_eq!(stats.total_problems, 1);
        assert_eq!(stats.services_with_problems, 0);
        assert_eq!(stats.avg_health_score, Some(70.0));
        assert_eq!(stats.avg_error_count, Some(10.0));
    }

    #[test]
    fn test_empty_snapshot_stats() {
        let snap = Snapshot::new(1, Utc::now(), vec![], vec![]);
        assert_eq!(snap.stats().total_services, 0);
        assert_eq!(snap.stats().healthy_percentage, 0.0);
        assert_eq!(snap.stats().avg_health_score, None);
    }
}

//! One build cycle, from upstream calls to an assembled snapshot.

use super::collector::collect_metrics;
use super::correlate::correlate;
use super::{BuildReport, CollectionError, PartialMetricError, Stage};
use crate::config::CollectionConfig;
use crate::source::{DataSource, SourceError};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use vigil_common::{
    HealthConfig, MetricAvailability, ProblemRef, ServiceIdentity, ServiceRecord, Snapshot,
};

/// Run the build protocol against `source`.
///
/// `previous` supplies metrics for services whose fetch fails this cycle.
/// Nothing is published here; the caller swaps the result in.
pub async fn build_snapshot(
    source: &Arc<dyn DataSource>,
    collection: &CollectionConfig,
    health: &HealthConfig,
    previous: Option<&Snapshot>,
) -> Result<(Snapshot, BuildReport), CollectionError> {
    let started = Instant::now();
    let timeout = collection.fetch_timeout();

    let services = fatal_call(Stage::ListServices, timeout, source.list_services()).await?;
    let services = dedup_services(services);
    info!("  [KB] {} services listed from {}", services.len(), source.name());

    let ids: Vec<String> = services.iter().map(|s| s.id.clone()).collect();
    let mut metrics = collect_metrics(source, &ids, collection).await;

    let problems = fatal_call(Stage::ListProblems, timeout, source.list_problems()).await?;
    debug!("  [KB] {} problems listed", problems.len());

    let mut problem_refs = correlate(&problems, collection.related_max_depth);

    let mut partial_failures = Vec::new();
    let now = Utc::now();
    let records: Vec<ServiceRecord> = services
        .into_iter()
        .map(|identity| {
            let fetched = metrics
                .remove(&identity.id)
                .unwrap_or_else(|| Err("no fetch result".to_string()));
            let availability = match fetched {
                Ok(set) => MetricAvailability::Fresh { metrics: set },
                Err(error) => {
                    let kept = previous
                        .and_then(|snap| snap.get(&identity.id))
                        .and_then(|record| record.metrics.metrics().cloned());
                    partial_failures.push(PartialMetricError {
                        service_id: identity.id.clone(),
                        message: error.clone(),
                        retained: kept.is_some(),
                    });
                    match kept {
                        Some(metrics) => MetricAvailability::Stale { metrics, error },
                        None => MetricAvailability::Unavailable { error },
                    }
                }
            };
            let problems = problem_refs.remove(&identity.id).unwrap_or_default();
            into_record(identity, availability, problems, health, now)
        })
        .collect();

    let generation = previous.map(|s| s.generation() + 1).unwrap_or(1);
    let snapshot = Snapshot::new(generation, now, records, problems);

    let report = BuildReport {
        generation,
        built_at: now,
        service_count: snapshot.service_count(),
        problem_count: snapshot.problems().len(),
        partial_failures,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    Ok((snapshot, report))
}

fn into_record(
    identity: ServiceIdentity,
    metrics: MetricAvailability,
    problems: Vec<ProblemRef>,
    health: &HealthConfig,
    now: DateTime<Utc>,
) -> ServiceRecord {
    let (health_score, status) = health.assess(metrics.metrics(), &problems);
    ServiceRecord {
        id: identity.id,
        display_name: identity.display_name,
        kind: identity.kind,
        tags: identity.tags,
        management_zones: identity.management_zones,
        metrics,
        problems,
        health_score,
        status,
        updated_at: now,
    }
}

/// The upstream list is authoritative; repeated ids keep their first entry
fn dedup_services(services: Vec<ServiceIdentity>) -> Vec<ServiceIdentity> {
    let mut seen = HashSet::new();
    services
        .into_iter()
        .filter(|s| seen.insert(s.id.clone()))
        .collect()
}

/// A single listing call whose failure or timeout aborts the cycle
async fn fatal_call<T>(
    stage: Stage,
    timeout: Duration,
    call: impl Future<Output = Result<T, SourceError>>,
) -> Result<T, CollectionError> {
    let outcome = match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout(timeout)),
    };
    outcome.map_err(|e| CollectionError::Fatal {
        stage,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FakeSource;
    use vigil_common::{HealthStatus, ProblemRecord, ProblemState, Relevance, Severity};

    fn collection() -> CollectionConfig {
        CollectionConfig {
            batch_delay_ms: 0,
            ..CollectionConfig::default()
        }
    }

    fn fake() -> Arc<FakeSource> {
        Arc::new(
            FakeSource::new()
                .with_service("SERVICE-A", "orders", (450.0, 120.0, 8.3, 900.0))
                .with_service("SERVICE-B", "cart", (2.0, 80.0, 0.1, 300.0))
                .with_problem(ProblemRecord {
                    id: "P-1".to_string(),
                    title: "Failure rate increase".to_string(),
                    severity: Severity::Error,
                    impacted_services: vec!["SERVICE-A".to_string()],
                    root_cause: Some("SERVICE-A".to_string()),
                    started_at: Utc::now(),
                    state: ProblemState::Open,
                }),
        )
    }

    #[tokio::test]
    async fn test_first_build() {
        let fake = fake();
        let source: Arc<dyn DataSource> = fake.clone();
        let (snap, report) = build_snapshot(&source, &collection(), &HealthConfig::default(), None)
            .await
            .unwrap();

        assert_eq!(snap.generation(), 1);
        assert_eq!(report.service_count, 2);
        assert_eq!(report.problem_count, 1);
        assert!(report.partial_failures.is_empty());

        let a = snap.get("SERVICE-A").unwrap();
        assert_eq!(a.problems[0].relevance, Relevance::RootCause);
        assert!(a.health_score.unwrap() < 50.0);
        assert_eq!(a.status, HealthStatus::Critical);
        assert_eq!(snap.get("SERVICE-B").unwrap().status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_new_service_without_metrics_is_unavailable() {
        let fake = fake();
        fake.fail_metrics("SERVICE-B");
        let source: Arc<dyn DataSource> = fake.clone();
        let (snap, report) = build_snapshot(&source, &collection(), &HealthConfig::default(), None)
            .await
            .unwrap();

        let b = snap.get("SERVICE-B").unwrap();
        assert!(matches!(b.metrics, MetricAvailability::Unavailable { .. }));
        assert_eq!(b.health_score, None);
        assert_eq!(b.status, HealthStatus::Unknown);
        assert_eq!(report.partial_failures.len(), 1);
        assert!(!report.partial_failures[0].retained);
    }

    #[tokio::test]
    async fn test_problem_list_failure_is_fatal() {
        let fake = fake();
        fake.fail_problems(true);
        let source: Arc<dyn DataSource> = fake.clone();
        let err = build_snapshot(&source, &collection(), &HealthConfig::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CollectionError::Fatal {
                stage: Stage::ListProblems,
                ..
            }
        ));
    }

    #[test]
    fn test_dedup_services_keeps_first() {
        let services = vec![
            ServiceIdentity::new("SERVICE-A", "first"),
            ServiceIdentity::new("SERVICE-A", "second"),
        ];
        let deduped = dedup_services(services);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].display_name, "first");
    }
}

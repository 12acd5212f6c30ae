//! Batched metric collection.
//!
//! Services are fetched `batch_size` at a time; a batch runs concurrently on
//! a `JoinSet` and the next batch starts only after the whole batch finished.
//! Each fetch carries its own timeout. Failures are returned per service and
//! never abort the cycle.

use crate::config::CollectionConfig;
use crate::source::{DataSource, SourceError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use vigil_common::MetricSet;

/// Per-service fetch outcome, keyed by service id
pub type MetricResults = HashMap<String, Result<MetricSet, String>>;

pub async fn collect_metrics(
    source: &Arc<dyn DataSource>,
    service_ids: &[String],
    config: &CollectionConfig,
) -> MetricResults {
    let batch_size = config.batch_size.max(1);
    let batches = service_ids.len().div_ceil(batch_size);
    let mut results: MetricResults = HashMap::with_capacity(service_ids.len());

    for (index, batch) in service_ids.chunks(batch_size).enumerate() {
        debug!(
            "  [COLLECT] batch {}/{} ({} services)",
            index + 1,
            batches,
            batch.len()
        );

        let mut join_set = JoinSet::new();
        for id in batch {
            let source = Arc::clone(source);
            let id = id.clone();
            let window = config.metrics_window.clone();
            let timeout = config.fetch_timeout();

            join_set.spawn(async move {
                let outcome = match tokio::time::timeout(timeout, source.fetch_metrics(&id, &window)).await {
                    Ok(Ok(metrics)) => Ok(metrics),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(SourceError::Timeout(timeout).to_string()),
                };
                (id, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((id, outcome)) => {
                    if let Err(e) = &outcome {
                        warn!("  [COLLECT] metrics for {} failed: {}", id, e);
                    }
                    results.insert(id, outcome);
                }
                Err(e) => warn!("  [COLLECT] fetch task failed: {}", e),
            }
        }

        // A task that panicked never reported its id
        for id in batch {
            results
                .entry(id.clone())
                .or_insert_with(|| Err("fetch task failed".to_string()));
        }

        if index + 1 < batches && config.batch_delay_ms > 0 {
            tokio::time::sleep(config.batch_delay()).await;
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FakeSource;
    use std::time::Duration;

    fn config(batch_size: usize) -> CollectionConfig {
        CollectionConfig {
            batch_size,
            batch_delay_ms: 0,
            fetch_timeout_secs: 1,
            ..CollectionConfig::default()
        }
    }

    fn fleet(n: usize) -> (Arc<FakeSource>, Vec<String>) {
        let fake = FakeSource::new();
        let mut ids = Vec::new();
        for i in 0..n {
            let id = format!("SERVICE-{:02}", i);
            fake.add_service(&id, &format!("svc-{}", i), (1.0, 100.0, 0.1, 60.0));
            ids.push(id);
        }
        (Arc::new(fake), ids)
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_batch() {
        let (fake, ids) = fleet(23);
        fake.set_latency(Duration::from_millis(20));
        let source: Arc<dyn DataSource> = fake.clone();

        let results = collect_metrics(&source, &ids, &config(5)).await;
        assert_eq!(results.len(), 23);
        assert!(results.values().all(|r| r.is_ok()));
        assert!(fake.peak_concurrency() <= 5);
        assert_eq!(fake.fetch_calls(), 23);
    }

    #[tokio::test]
    async fn test_failures_are_per_service() {
        let (fake, ids) = fleet(4);
        fake.fail_metrics("SERVICE-02");
        let source: Arc<dyn DataSource> = fake.clone();

        let results = collect_metrics(&source, &ids, &config(10)).await;
        assert!(results["SERVICE-02"].is_err());
        assert_eq!(results.values().filter(|r| r.is_ok()).count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_fetch_times_out() {
        let (fake, ids) = fleet(3);
        fake.stall_metrics("SERVICE-01");
        let source: Arc<dyn DataSource> = fake.clone();

        let results = collect_metrics(&source, &ids, &config(10)).await;
        let err = results["SERVICE-01"].as_ref().unwrap_err();
        assert!(err.contains("timed out"));
        assert!(results["SERVICE-00"].is_ok());
    }
}

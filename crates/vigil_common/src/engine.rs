//! Query engine: pure functions of (query, snapshot).
//!
//! The engine never reaches upstream and never mutates the snapshot. Every
//! record it returns is an `Arc` clone of the snapshot's own record.

use crate::error::QueryError;
use crate::metric::Metric;
use crate::model::ServiceRecord;
use crate::predicate::Predicate;
use crate::query::{SortOrder, StructuredQuery, StructuredResult};
use crate::snapshot::Snapshot;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Execute one structured query against one snapshot
pub fn execute(query: &StructuredQuery, snapshot: &Snapshot) -> Result<StructuredResult, QueryError> {
    debug!(
        "  [ENGINE] {} against generation {}",
        query.action(),
        snapshot.generation()
    );
    match query {
        StructuredQuery::Rank {
            metric,
            order,
            limit,
        } => rank(snapshot, metric, *order, *limit),
        StructuredQuery::Filter { predicate } => {
            let services = filter(snapshot, predicate)?;
            Ok(StructuredResult::Filter { services })
        }
        StructuredQuery::Aggregate {} => Ok(StructuredResult::Aggregate {
            stats: snapshot.stats().clone(),
        }),
        StructuredQuery::Compare { service_ids } => Ok(compare(snapshot, service_ids)),
        StructuredQuery::Count { predicate } => {
            let services = match predicate {
                Some(p) => filter(snapshot, p)?,
                None => snapshot.services().cloned().collect(),
            };
            Ok(StructuredResult::Count {
                count: services.len(),
                services,
            })
        }
        StructuredQuery::Describe { service_id } => snapshot
            .find(service_id)
            .map(|service| StructuredResult::Describe {
                service: Arc::clone(service),
            })
            .ok_or_else(|| QueryError::UnknownService(service_id.clone())),
    }
}

fn rank(
    snapshot: &Snapshot,
    metric: &str,
    order: SortOrder,
    limit: Option<usize>,
) -> Result<StructuredResult, QueryError> {
    let metric: Metric = metric.parse()?;

    let mut keyed: Vec<(Option<f64>, &Arc<ServiceRecord>)> = snapshot
        .services()
        .map(|s| (s.metric(metric), s))
        .collect();
    keyed.sort_by(|(a, sa), (b, sb)| rank_cmp(*a, *b, order).then_with(|| sa.id.cmp(&sb.id)));

    let take = limit.unwrap_or(keyed.len());
    let services = keyed
        .into_iter()
        .take(take)
        .map(|(_, s)| Arc::clone(s))
        .collect();

    Ok(StructuredResult::Rank {
        metric,
        order,
        services,
    })
}

/// Missing values sort last in both directions
fn rank_cmp(a: Option<f64>, b: Option<f64>, order: SortOrder) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match order {
            SortOrder::Asc => a.total_cmp(&b),
            SortOrder::Desc => b.total_cmp(&a),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn filter(snapshot: &Snapshot, predicate: &Predicate) -> Result<Vec<Arc<ServiceRecord>>, QueryError> {
    let compiled = predicate.compile()?;
    Ok(snapshot
        .services()
        .filter(|s| compiled.matches(s))
        .cloned()
        .collect())
}

fn compare(snapshot: &Snapshot, keys: &[String]) -> StructuredResult {
    let mut found: Vec<Arc<ServiceRecord>> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut not_found: Vec<String> = Vec::new();

    for key in keys {
        match snapshot.find(key) {
            Some(service) => {
                if seen.insert(service.id.as_str()) {
                    found.push(Arc::clone(service));
                }
            }
            None => {
                if !not_found.contains(key) {
                    not_found.push(key.clone());
                }
            }
        }
    }

    StructuredResult::Compare { found, not_found }
}

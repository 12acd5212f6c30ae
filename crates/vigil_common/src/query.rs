//! Structured queries and their results.
//!
//! The query is a closed set of operations produced by an external
//! interpretation step. Results hold `Arc` handles to the snapshot's own
//! records, so a result can never diverge from the snapshot it came from.

use crate::metric::Metric;
use crate::model::ServiceRecord;
use crate::predicate::Predicate;
use crate::snapshot::AggregateStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Query input, tagged by `action`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StructuredQuery {
    /// Sort all services by a metric, ties by identifier ascending
    Rank {
        metric: String,
        #[serde(default)]
        order: SortOrder,
        /// Absent means the whole set
        #[serde(default)]
        limit: Option<usize>,
    },
    /// Services matching the predicate, in identifier order
    Filter {
        #[serde(alias = "condition")]
        predicate: Predicate,
    },
    /// Precomputed statistics of the snapshot
    Aggregate {},
    /// Look up services by identifier or display name
    Compare {
        #[serde(alias = "services")]
        service_ids: Vec<String>,
    },
    /// Number of matching services plus the matches; no predicate counts all
    Count {
        #[serde(default, alias = "condition")]
        predicate: Option<Predicate>,
    },
    /// Single service by identifier or display name
    Describe {
        #[serde(alias = "service")]
        service_id: String,
    },
}

impl StructuredQuery {
    pub fn rank(metric: &str, order: SortOrder, limit: Option<usize>) -> Self {
        StructuredQuery::Rank {
            metric: metric.to_string(),
            order,
            limit,
        }
    }

    pub fn filter(predicate: Predicate) -> Self {
        StructuredQuery::Filter { predicate }
    }

    pub fn aggregate() -> Self {
        StructuredQuery::Aggregate {}
    }

    pub fn compare<S: AsRef<str>>(service_ids: &[S]) -> Self {
        StructuredQuery::Compare {
            service_ids: service_ids.iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }

    pub fn count(predicate: Option<Predicate>) -> Self {
        StructuredQuery::Count { predicate }
    }

    pub fn describe(service_id: &str) -> Self {
        StructuredQuery::Describe {
            service_id: service_id.to_string(),
        }
    }

    /// Operation name for logs
    pub fn action(&self) -> &'static str {
        match self {
            StructuredQuery::Rank { .. } => "rank",
            StructuredQuery::Filter { .. } => "filter",
            StructuredQuery::Aggregate {} => "aggregate",
            StructuredQuery::Compare { .. } => "compare",
            StructuredQuery::Count { .. } => "count",
            StructuredQuery::Describe { .. } => "describe",
        }
    }
}

/// Query output, mirroring the query kind
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuredResult {
    Rank {
        metric: Metric,
        order: SortOrder,
        services: Vec<Arc<ServiceRecord>>,
    },
    Filter {
        services: Vec<Arc<ServiceRecord>>,
    },
    Aggregate {
        stats: AggregateStats,
    },
    /// `not_found` non-empty is the "found 2 of 3" annotation, not an error
    Compare {
        found: Vec<Arc<ServiceRecord>>,
        not_found: Vec<String>,
    },
    Count {
        count: usize,
        services: Vec<Arc<ServiceRecord>>,
    },
    Describe {
        service: Arc<ServiceRecord>,
    },
}

impl StructuredResult {
    /// Service records carried by the result, in result order
    pub fn services(&self) -> &[Arc<ServiceRecord>] {
        match self {
            StructuredResult::Rank { services, .. }
            | StructuredResult::Filter { services }
            | StructuredResult::Count { services, .. } => services,
            StructuredResult::Compare { found, .. } => found,
            StructuredResult::Describe { service } => std::slice::from_ref(service),
            StructuredResult::Aggregate { .. } => &[],
        }
    }

    /// Identifiers of the carried records, in result order
    pub fn service_ids(&self) -> Vec<&str> {
        self.services().iter().map(|s| s.id.as_str()).collect()
    }
}

/// A result tagged with the snapshot it was computed against
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub generation: u64,
    pub built_at: DateTime<Utc>,
    pub result: StructuredResult,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::CompareOp;

    #[test]
    fn test_parse_rank_defaults() {
        let q: StructuredQuery =
            serde_json::from_str(r#"{"action": "rank", "metric": "failure_rate"}"#).unwrap();
        assert_eq!(q, StructuredQuery::rank("failure_rate", SortOrder::Desc, None));
    }

    #[test]
    fn test_parse_interpreter_shapes() {
        // Shapes produced by the interpretation step, including its field names
        let q: StructuredQuery = serde_json::from_str(
            r#"{"action": "filter", "condition": "error_count > 100"}"#,
        )
        .unwrap();
        assert_eq!(q, StructuredQuery::filter(Predicate::condition("error_count > 100")));

        let q: StructuredQuery = serde_json::from_str(
            r#"{"action": "filter", "predicate": {"type": "compare", "metric": "error_count", "op": ">", "value": 100}}"#,
        )
        .unwrap();
        assert_eq!(
            q,
            StructuredQuery::filter(Predicate::compare("error_count", CompareOp::Gt, 100.0))
        );

        let q: StructuredQuery =
            serde_json::from_str(r#"{"action": "aggregate", "scope": "all"}"#).unwrap();
        assert_eq!(q, StructuredQuery::aggregate());

        let q: StructuredQuery =
            serde_json::from_str(r#"{"action": "compare", "services": ["a", "b"]}"#).unwrap();
        assert_eq!(q, StructuredQuery::compare(&["a", "b"]));

        let q: StructuredQuery = serde_json::from_str(r#"{"action": "count"}"#).unwrap();
        assert_eq!(q, StructuredQuery::count(None));
    }

    #[test]
    fn test_bad_condition_still_deserializes() {
        // Rejected by the engine as InvalidPredicate, not here
        let q: StructuredQuery =
            serde_json::from_str(r#"{"action": "filter", "predicate": "error_count >"}"#).unwrap();
        assert_eq!(q, StructuredQuery::filter(Predicate::condition("error_count >")));
    }
}

//! Shared types and the query engine for Vigil components.
//!
//! Everything in this crate is synchronous and free of I/O: the daemon builds
//! snapshots out of these types, and the engine answers structured queries
//! against one snapshot at a time.

pub mod engine;
pub mod error;
pub mod health;
pub mod metric;
pub mod model;
pub mod predicate;
pub mod query;
pub mod snapshot;
pub mod status;

pub use engine::execute;
pub use error::QueryError;
pub use health::{HealthConfig, HealthStatus};
pub use metric::Metric;
pub use model::{
    MetricAvailability, MetricSet, MetricUnit, MetricValue, ProblemRecord, ProblemRef,
    ProblemState, Relevance, ServiceIdentity, ServiceRecord, Severity,
};
pub use predicate::{CompareOp, Predicate};
pub use query::{QueryResponse, SortOrder, StructuredQuery, StructuredResult};
pub use snapshot::{AggregateStats, Snapshot};
pub use status::KnowledgeStatus;

/// Version of the shared crate, reported by the daemon status endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

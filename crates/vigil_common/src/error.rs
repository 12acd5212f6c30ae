//! Error types returned across the query boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("Unknown service '{0}'")]
    UnknownService(String),

    #[error("Invalid predicate: {0}")]
    InvalidPredicate(String),

    #[error("Knowledge base is still gathering data")]
    NotReady,

    #[error("Malformed query: {0}")]
    InvalidQuery(String),
}

impl QueryError {
    /// Stable numeric code for wire responses
    pub fn code(&self) -> i32 {
        match self {
            QueryError::UnknownMetric(_) => -32010,
            QueryError::UnknownService(_) => -32011,
            QueryError::InvalidPredicate(_) => -32012,
            QueryError::NotReady => -32013,
            QueryError::InvalidQuery(_) => -32014,
        }
    }

    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::UnknownMetric(_) => "unknown_metric",
            QueryError::UnknownService(_) => "unknown_service",
            QueryError::InvalidPredicate(_) => "invalid_predicate",
            QueryError::NotReady => "not_ready",
            QueryError::InvalidQuery(_) => "invalid_query",
        }
    }

    pub fn to_body(&self) -> QueryErrorBody {
        QueryErrorBody {
            code: self.code(),
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// Serialized form of a [`QueryError`] for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryErrorBody {
    pub code: i32,
    pub kind: String,
    pub message: String,
}

//! Recognized metric names.

use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every name a query may rank or filter by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    ErrorCount,
    ResponseTime,
    FailureRate,
    Throughput,
    HealthScore,
    ProblemCount,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::ErrorCount,
        Metric::ResponseTime,
        Metric::FailureRate,
        Metric::Throughput,
        Metric::HealthScore,
        Metric::ProblemCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::ErrorCount => "error_count",
            Metric::ResponseTime => "response_time",
            Metric::FailureRate => "failure_rate",
            Metric::Throughput => "throughput",
            Metric::HealthScore => "health_score",
            Metric::ProblemCount => "problem_count",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error_count" | "errors" => Ok(Metric::ErrorCount),
            "response_time" => Ok(Metric::ResponseTime),
            "failure_rate" => Ok(Metric::FailureRate),
            "throughput" | "request_count" => Ok(Metric::Throughput),
            "health_score" => Ok(Metric::HealthScore),
            "problem_count" | "problems" => Ok(Metric::ProblemCount),
            _ => Err(QueryError::UnknownMetric(s.to_string())),
        }
    }
}

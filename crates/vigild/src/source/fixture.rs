//! File-backed source for offline and demo operation.
//!
//! The document holds the three upstream lists verbatim:
//!
//! ```json
//! {
//!   "services": [{"id": "SERVICE-A", "display_name": "orders"}],
//!   "metrics": {"SERVICE-A": {"error_count": 12, "response_time_ms": 180,
//!                             "failure_rate": 0.4, "throughput": 950}},
//!   "problems": []
//! }
//! ```
//!
//! A service without a `metrics` entry fails its metric fetch, which makes
//! the fixture useful for exercising degraded records.

use super::{DataSource, SourceError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;
use vigil_common::{MetricSet, ProblemRecord, ServiceIdentity};

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureMetrics {
    #[serde(default)]
    pub error_count: f64,
    #[serde(default)]
    pub response_time_ms: f64,
    #[serde(default)]
    pub failure_rate: f64,
    #[serde(default)]
    pub throughput: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixtureDocument {
    #[serde(default)]
    pub services: Vec<ServiceIdentity>,
    #[serde(default)]
    pub metrics: HashMap<String, FixtureMetrics>,
    #[serde(default)]
    pub problems: Vec<ProblemRecord>,
}

pub struct FixtureSource {
    document: FixtureDocument,
}

impl FixtureSource {
    pub fn new(document: FixtureDocument) -> Self {
        Self { document }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        let document: FixtureDocument = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse fixture {}", path.display()))?;
        info!(
            "Loaded fixture {} ({} services, {} problems)",
            path.display(),
            document.services.len(),
            document.problems.len()
        );
        Ok(Self::new(document))
    }
}

#[async_trait]
impl DataSource for FixtureSource {
    async fn list_services(&self) -> Result<Vec<ServiceIdentity>, SourceError> {
        Ok(self.document.services.clone())
    }

    async fn fetch_metrics(
        &self,
        service_id: &str,
        window: &str,
    ) -> Result<MetricSet, SourceError> {
        let m = self.document.metrics.get(service_id).ok_or_else(|| {
            SourceError::Unavailable(format!("no fixture metrics for {}", service_id))
        })?;
        Ok(MetricSet::from_values(
            window,
            m.error_count,
            m.response_time_ms,
            m.failure_rate,
            m.throughput,
        ))
    }

    async fn list_problems(&self) -> Result<Vec<ProblemRecord>, SourceError> {
        Ok(self.document.problems.clone())
    }

    fn name(&self) -> &str {
        "fixture"
    }
}

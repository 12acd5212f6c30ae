//! Data source adapters.
//!
//! The knowledge base only depends on the [`DataSource`] contract. Production
//! uses [`DynatraceSource`]; offline runs use [`FixtureSource`]; tests use the
//! scripted [`FakeSource`].

pub mod dynatrace;
pub mod fake;
pub mod fixture;

pub use dynatrace::DynatraceSource;
pub use fake::FakeSource;
pub use fixture::FixtureSource;

use crate::config::{SourceConfig, SourceKind};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use vigil_common::{MetricSet, ProblemRecord, ServiceIdentity};

// ============================================================================
// Errors
// ============================================================================

/// Failure of a single upstream call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode upstream response: {0}")]
    Decode(String),

    #[error("Upstream call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SourceError::Decode(e.to_string())
        } else {
            SourceError::Http(e.to_string())
        }
    }
}

// ============================================================================
// Data Source Trait
// ============================================================================

/// Upstream contract consumed by the knowledge base
///
/// Every call is fallible. Timeouts are applied by the caller, so an
/// implementation may simply await.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Full list of monitored services
    async fn list_services(&self) -> Result<Vec<ServiceIdentity>, SourceError>;

    /// Complete metric set for one service over `window`
    async fn fetch_metrics(&self, service_id: &str, window: &str)
        -> Result<MetricSet, SourceError>;

    /// Open and recent problems
    async fn list_problems(&self) -> Result<Vec<ProblemRecord>, SourceError>;

    /// Short name for logs
    fn name(&self) -> &str;
}

/// Build the configured source
pub fn from_config(config: &SourceConfig, timeout: Duration) -> Result<Arc<dyn DataSource>> {
    match config.kind {
        SourceKind::Dynatrace => {
            let token = config
                .resolved_token()
                .ok_or_else(|| anyhow!("no API token configured (source.api_token or $VIGIL_API_TOKEN)"))?;
            if config.base_url.is_empty() {
                return Err(anyhow!("source.base_url is required for the dynatrace source"));
            }
            let source = DynatraceSource::new(&config.base_url, &token, config.page_size, timeout)?;
            Ok(Arc::new(source))
        }
        SourceKind::Fixture => {
            let path = config
                .fixture_path
                .as_ref()
                .ok_or_else(|| anyhow!("source.fixture_path is required for the fixture source"))?;
            Ok(Arc::new(FixtureSource::load(path)?))
        }
    }
}

//! HTTP client for the vigild API.

use anyhow::{anyhow, Context, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use vigil_common::error::QueryErrorBody;
use vigil_common::{AggregateStats, KnowledgeStatus, StructuredQuery};

pub const DEFAULT_URL: &str = "http://127.0.0.1:7870";

/// A refresh waits for a whole build cycle
const REFRESH_TIMEOUT: Duration = Duration::from_secs(600);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct VigilClient {
    http: reqwest::Client,
    base_url: String,
}

impl VigilClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<Value> {
        self.get("/v1/health").await
    }

    pub async fn status(&self) -> Result<KnowledgeStatus> {
        self.get("/v1/status").await
    }

    pub async fn stats(&self) -> Result<AggregateStats> {
        self.get("/v1/stats").await
    }

    /// Trigger or join a build; the body is the build report or the failure
    pub async fn refresh(&self) -> Result<Value> {
        let response = self
            .http
            .post(self.endpoint("/v1/refresh"))
            .timeout(REFRESH_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        let status = response.status();
        let body: Value = response.json().await.context("Invalid refresh response")?;
        if status.is_success() {
            Ok(body)
        } else {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown failure");
            Err(anyhow!("Refresh failed ({}): {}", status, message))
        }
    }

    pub async fn query(&self, query: &StructuredQuery) -> Result<Value> {
        self.post("/v1/query", query).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.endpoint(path))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        decode(response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .http
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        decode(response).await
    }

    fn unreachable(&self, e: reqwest::Error) -> anyhow::Error {
        anyhow!(
            "Cannot reach vigild at {}: {}\n\n\
             Is the daemon running? Start it with: vigild --config /etc/vigil/config.toml",
            self.base_url,
            e
        )
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response.json().await.context("Invalid response from vigild");
    }

    let text = response.text().await.unwrap_or_default();
    Err(error_from_body(status, &text))
}

/// Turn an error response into a readable message
fn error_from_body(status: StatusCode, text: &str) -> anyhow::Error {
    match serde_json::from_str::<QueryErrorBody>(text) {
        Ok(body) => anyhow!("{} ({})", body.message, body.kind),
        Err(_) if text.is_empty() => anyhow!("vigild returned {}", status),
        Err(_) => anyhow!("vigild returned {}: {}", status, text),
    }
}

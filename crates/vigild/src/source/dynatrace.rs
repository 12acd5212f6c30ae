//! Dynatrace v2 REST adapter.
//!
//! Three endpoints back the [`DataSource`] contract:
//! - `/api/v2/entities` for the service list (paginated)
//! - `/api/v2/metrics/query` for one service's metric set
//! - `/api/v2/problems` for open and recent problems (paginated)
//!
//! Response parsing lives in plain functions so it can be tested without a
//! server.

use super::{DataSource, SourceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use vigil_common::{MetricSet, ProblemRecord, ProblemState, ServiceIdentity, Severity};

const ERROR_COUNT: &str = "builtin:service.errors.total.count";
const RESPONSE_TIME: &str = "builtin:service.response.time";
const FAILURE_RATE: &str = "builtin:service.errors.total.rate";
const REQUEST_COUNT: &str = "builtin:service.requestCount.total";

/// Services are the only entity type correlated with problems
const SERVICE_PREFIX: &str = "SERVICE-";

/// How far back problems are listed
const PROBLEM_WINDOW: &str = "now-2h";

pub struct DynatraceSource {
    client: reqwest::Client,
    base_url: String,
    token: String,
    page_size: u32,
    timeout: Duration,
}

impl DynatraceSource {
    pub fn new(
        base_url: &str,
        token: &str,
        page_size: u32,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            page_size,
            timeout,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Api-Token {}", self.token))
            .query(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Timeout(self.timeout)
                } else {
                    SourceError::from(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| SourceError::Decode(format!("{}: {}", path, e)))
    }

    /// Follow `nextPageKey` until exhausted.
    ///
    /// The API rejects any other selector once a page key is given, so later
    /// pages carry only the key.
    async fn paginate<P, T>(
        &self,
        path: &str,
        first: Vec<(&str, String)>,
        mut parse: impl FnMut(P) -> (Vec<T>, Option<String>),
    ) -> Result<Vec<T>, SourceError>
    where
        P: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut params = first;
        let mut pages = 0usize;

        loop {
            let page: P = self.get_json(path, &params).await?;
            let (mut batch, next) = parse(page);
            items.append(&mut batch);
            pages += 1;

            match next {
                Some(key) if !key.is_empty() => params = vec![("nextPageKey", key)],
                _ => break,
            }
        }

        debug!("  [DT] {} -> {} items over {} pages", path, items.len(), pages);
        Ok(items)
    }
}

#[async_trait]
impl DataSource for DynatraceSource {
    async fn list_services(&self) -> Result<Vec<ServiceIdentity>, SourceError> {
        let params = vec![
            ("entitySelector", "type(\"SERVICE\")".to_string()),
            (
                "fields",
                "+properties.serviceType,+tags,+managementZones".to_string(),
            ),
            ("pageSize", self.page_size.to_string()),
        ];
        self.paginate("/api/v2/entities", params, parse_entities_page)
            .await
    }

    async fn fetch_metrics(
        &self,
        service_id: &str,
        window: &str,
    ) -> Result<MetricSet, SourceError> {
        let selector = [ERROR_COUNT, RESPONSE_TIME, FAILURE_RATE, REQUEST_COUNT].join(",");
        let params = vec![
            ("metricSelector", selector),
            ("entitySelector", format!("entityId(\"{}\")", service_id)),
            ("from", format!("now-{}", window)),
            ("resolution", "Inf".to_string()),
        ];
        let response: MetricsResponse = self.get_json("/api/v2/metrics/query", &params).await?;
        Ok(metric_set_from_response(&response, window))
    }

    async fn list_problems(&self) -> Result<Vec<ProblemRecord>, SourceError> {
        let params = vec![
            ("from", PROBLEM_WINDOW.to_string()),
            ("pageSize", self.page_size.to_string()),
        ];
        self.paginate("/api/v2/problems", params, parse_problems_page)
            .await
    }

    fn name(&self) -> &str {
        "dynatrace"
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitiesPage {
    #[serde(default)]
    pub entities: Vec<Entity>,
    pub next_page_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub entity_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub properties: EntityProperties,
    #[serde(default)]
    pub tags: Vec<EntityTag>,
    #[serde(default)]
    pub management_zones: Vec<ManagementZone>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityProperties {
    pub service_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityTag {
    pub string_representation: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ManagementZone {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct MetricsResponse {
    #[serde(default)]
    pub result: Vec<MetricSeriesCollection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSeriesCollection {
    pub metric_id: String,
    #[serde(default)]
    pub data: Vec<MetricSeries>,
}

#[derive(Debug, Deserialize)]
pub struct MetricSeries {
    #[serde(default)]
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemsPage {
    #[serde(default)]
    pub problems: Vec<Problem>,
    pub next_page_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub problem_id: String,
    #[serde(default)]
    pub title: String,
    pub severity_level: Severity,
    pub status: ProblemState,
    #[serde(default)]
    pub impacted_entities: Vec<EntityStub>,
    #[serde(default)]
    pub affected_entities: Vec<EntityStub>,
    pub root_cause_entity: Option<EntityStub>,
    pub start_time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityStub {
    pub entity_id: EntityRef,
}

#[derive(Debug, Deserialize)]
pub struct EntityRef {
    pub id: String,
}

// ============================================================================
// Parsing
// ============================================================================

pub fn parse_entities_page(page: EntitiesPage) -> (Vec<ServiceIdentity>, Option<String>) {
    let services = page
        .entities
        .into_iter()
        .map(|e| ServiceIdentity {
            display_name: e.display_name.unwrap_or_else(|| e.entity_id.clone()),
            id: e.entity_id,
            kind: e
                .properties
                .service_type
                .unwrap_or_else(|| "Unknown".to_string()),
            tags: e
                .tags
                .into_iter()
                .filter_map(|t| t.string_representation.or(t.key))
                .collect(),
            management_zones: e.management_zones.into_iter().map(|z| z.name).collect(),
        })
        .collect();
    (services, page.next_page_key)
}

/// First non-null value of the series whose id starts with `key`; 0 when absent
fn series_value(response: &MetricsResponse, key: &str) -> f64 {
    response
        .result
        .iter()
        .filter(|c| c.metric_id == key || c.metric_id.starts_with(&format!("{}:", key)))
        .flat_map(|c| c.data.iter())
        .flat_map(|s| s.values.iter())
        .find_map(|v| *v)
        .unwrap_or(0.0)
}

/// Minutes covered by a window like "30m", "2h" or "1d"
pub fn window_minutes(window: &str) -> Option<f64> {
    let window = window.trim();
    let (split, _) = window.char_indices().last()?;
    let (amount, unit) = window.split_at(split);
    let amount: f64 = amount.parse().ok()?;
    let factor = match unit {
        "m" => 1.0,
        "h" => 60.0,
        "d" => 1440.0,
        _ => return None,
    };
    (amount > 0.0).then_some(amount * factor)
}

pub fn metric_set_from_response(response: &MetricsResponse, window: &str) -> MetricSet {
    let errors = series_value(response, ERROR_COUNT);
    // Reported in microseconds
    let response_ms = series_value(response, RESPONSE_TIME) / 1000.0;
    let failure_rate = series_value(response, FAILURE_RATE);
    let requests = series_value(response, REQUEST_COUNT);
    let throughput = match window_minutes(window) {
        Some(minutes) => requests / minutes,
        None => requests,
    };
    MetricSet::from_values(window, errors, response_ms, failure_rate, throughput)
}

pub fn parse_problems_page(page: ProblemsPage) -> (Vec<ProblemRecord>, Option<String>) {
    let problems = page.problems.into_iter().map(problem_record).collect();
    (problems, page.next_page_key)
}

fn problem_record(p: Problem) -> ProblemRecord {
    let root_cause = p
        .root_cause_entity
        .map(|e| e.entity_id.id)
        .filter(|id| id.starts_with(SERVICE_PREFIX));

    let mut impacted: Vec<String> = p
        .impacted_entities
        .into_iter()
        .chain(p.affected_entities)
        .map(|e| e.entity_id.id)
        .chain(root_cause.clone())
        .filter(|id| id.starts_with(SERVICE_PREFIX))
        .collect();
    impacted.sort();
    impacted.dedup();

    ProblemRecord {
        id: p.problem_id,
        title: p.title,
        severity: p.severity_level,
        impacted_services: impacted,
        root_cause,
        started_at: DateTime::<Utc>::from_timestamp_millis(p.start_time).unwrap_or_else(Utc::now),
        state: p.status,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_entities_page() {
        let page: EntitiesPage = serde_json::from_str(
            r#"{
                "totalCount": 2,
                "pageSize": 200,
                "nextPageKey": "AQAAABQBAAAABQ==",
                "entities": [
                    {
                        "entityId": "SERVICE-1A2B",
                        "displayName": "OrderController",
                        "properties": {"serviceType": "WEB_REQUEST"},
                        "tags": [{"key": "team", "value": "checkout", "stringRepresentation": "team:checkout"}],
                        "managementZones": [{"id": "42", "name": "Production"}]
                    },
                    {"entityId": "SERVICE-3C4D"}
                ]
            }"#,
        )
        .unwrap();
        let (services, next) = parse_entities_page(page);
        assert_eq!(next.as_deref(), Some("AQAAABQBAAAABQ=="));
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].display_name, "OrderController");
        assert_eq!(services[0].kind, "WEB_REQUEST");
        assert_eq!(services[0].tags, vec!["team:checkout".to_string()]);
        assert_eq!(services[0].management_zones, vec!["Production".to_string()]);
        // Missing display name falls back to the id
        assert_eq!(services[1].display_name, "SERVICE-3C4D");
        assert_eq!(services[1].kind, "Unknown");
    }

    #[test]
    fn test_metric_set_units() {
        let response: MetricsResponse = serde_json::from_str(
            r#"{
                "totalCount": 4,
                "result": [
                    {"metricId": "builtin:service.errors.total.count", "data": [{"dimensions": ["SERVICE-1"], "timestamps": [1], "values": [450.0]}]},
                    {"metricId": "builtin:service.response.time", "data": [{"dimensions": ["SERVICE-1"], "timestamps": [1], "values": [250000.0]}]},
                    {"metricId": "builtin:service.errors.total.rate", "data": [{"dimensions": ["SERVICE-1"], "timestamps": [1], "values": [8.3]}]},
                    {"metricId": "builtin:service.requestCount.total", "data": [{"dimensions": ["SERVICE-1"], "timestamps": [1], "values": [12000.0]}]}
                ]
            }"#,
        )
        .unwrap();
        let set = metric_set_from_response(&response, "2h");
        assert_relative_eq!(set.error_count.value, 450.0);
        assert_relative_eq!(set.response_time.value, 250.0);
        assert_relative_eq!(set.failure_rate.value, 8.3);
        assert_relative_eq!(set.throughput.value, 100.0);
        assert_eq!(set.response_time.window, "2h");
    }

    #[test]
    fn test_missing_series_is_zero() {
        let response: MetricsResponse = serde_json::from_str(
            r#"{"result": [
                {"metricId": "builtin:service.errors.total.count", "data": [{"values": [null]}]}
            ]}"#,
        )
        .unwrap();
        let set = metric_set_from_response(&response, "2h");
        assert_eq!(set.error_count.value, 0.0);
        assert_eq!(set.throughput.value, 0.0);
    }

    #[test]
    fn test_window_minutes() {
        assert_eq!(window_minutes("2h"), Some(120.0));
        assert_eq!(window_minutes("30m"), Some(30.0));
        assert_eq!(window_minutes("1d"), Some(1440.0));
        assert_eq!(window_minutes("soon"), None);
        assert_eq!(window_minutes(""), None);
    }

    #[test]
    fn test_problem_entities_merged() {
        let page: ProblemsPage = serde_json::from_str(
            r#"{
                "totalCount": 1,
                "problems": [{
                    "problemId": "-123_456V2",
                    "displayId": "P-2401",
                    "title": "Failure rate increase",
                    "severityLevel": "ERROR",
                    "status": "OPEN",
                    "impactedEntities": [
                        {"entityId": {"id": "SERVICE-B", "type": "SERVICE"}, "name": "cart"},
                        {"entityId": {"id": "HOST-9", "type": "HOST"}, "name": "web-1"}
                    ],
                    "affectedEntities": [
                        {"entityId": {"id": "SERVICE-B", "type": "SERVICE"}, "name": "cart"},
                        {"entityId": {"id": "SERVICE-C", "type": "SERVICE"}, "name": "pay"}
                    ],
                    "rootCauseEntity": {"entityId": {"id": "SERVICE-A", "type": "SERVICE"}, "name": "orders"},
                    "startTime": 1700000000000,
                    "endTime": -1
                }]
            }"#,
        )
        .unwrap();
        let (problems, next) = parse_problems_page(page);
        assert!(next.is_none());
        let p = &problems[0];
        assert_eq!(p.severity, Severity::Error);
        assert_eq!(p.state, ProblemState::Open);
        assert_eq!(p.root_cause.as_deref(), Some("SERVICE-A"));
        assert_eq!(p.impacted_services, vec!["SERVICE-A", "SERVICE-B", "SERVICE-C"]);
        assert_eq!(p.started_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_non_service_root_cause_dropped() {
        let page: ProblemsPage = serde_json::from_str(
            r#"{"problems": [{
                "problemId": "P-1",
                "title": "Host CPU saturated",
                "severityLevel": "RESOURCE_CONTENTION",
                "status": "CLOSED",
                "rootCauseEntity": {"entityId": {"id": "HOST-1", "type": "HOST"}},
                "startTime": 0
            }]}"#,
        )
        .unwrap();
        let (problems, _) = parse_problems_page(page);
        assert!(problems[0].root_cause.is_none());
        assert!(problems[0].impacted_services.is_empty());
        assert!(!problems[0].is_open());
    }
}

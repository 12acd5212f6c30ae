//! HTTP API tests driven through the router without a socket.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use vigild::config::CollectionConfig;
use vigild::knowledge::KnowledgeBase;
use vigild::server::{router, AppState};
use vigild::source::FakeSource;
use vigild::DataSource;

fn setup() -> (Arc<FakeSource>, KnowledgeBase, Router) {
    let fake = Arc::new(
        FakeSource::new()
            .with_service("SERVICE-A", "orders", (450.0, 120.0, 8.3, 900.0))
            .with_service("SERVICE-B", "cart", (12.0, 80.0, 0.4, 300.0)),
    );
    let source: Arc<dyn DataSource> = fake.clone();
    let kb = KnowledgeBase::new(
        source,
        CollectionConfig {
            batch_delay_ms: 0,
            ..CollectionConfig::default()
        },
        Default::default(),
    );
    let app = router(AppState::new(kb.clone()));
    (fake, kb, app)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health_reports_readiness() {
    let (_fake, kb, app) = setup();
    let (status, body) = send(&app, "GET", "/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["ready"], false);

    kb.refresh().await.unwrap();
    let (_, body) = send(&app, "GET", "/v1/health", None).await;
    assert_eq!(body["ready"], true);
}

#[tokio::test]
async fn test_query_before_first_build_is_unavailable() {
    let (_fake, _kb, app) = setup();
    let (status, body) = send(&app, "POST", "/v1/query", Some(json!({"action": "aggregate"}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "not_ready");

    let (status, _) = send(&app, "GET", "/v1/stats", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_refresh_then_rank() {
    let (_fake, _kb, app) = setup();
    let (status, report) = send(&app, "POST", "/v1/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["generation"], 1);
    assert_eq!(report["service_count"], 2);

    let query = json!({"action": "rank", "metric": "failure_rate", "order": "desc", "limit": 1});
    let (status, body) = send(&app, "POST", "/v1/query", Some(query)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["generation"], 1);
    assert_eq!(body["result"]["kind"], "rank");
    let services = body["result"]["services"].as_array().unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0]["id"], "SERVICE-A");
}

#[tokio::test]
async fn test_filter_with_condition_text() {
    let (_fake, kb, app) = setup();
    kb.refresh().await.unwrap();

    let query = json!({"action": "filter", "condition": "error_count > 100"});
    let (status, body) = send(&app, "POST", "/v1/query", Some(query)).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body["result"]["services"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|s| s["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["SERVICE-A"]);
}

#[tokio::test]
async fn test_query_errors_map_to_status_codes() {
    let (_fake, kb, app) = setup();
    kb.refresh().await.unwrap();

    let (status, body) = send(
        &app,
        "POST",
        "/v1/query",
        Some(json!({"action": "rank", "metric": "latency_p99"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "unknown_metric");

    let (status, body) = send(
        &app,
        "POST",
        "/v1/query",
        Some(json!({"action": "describe", "service_id": "SERVICE-Z"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "unknown_service");

    // Compare reports missing services instead of failing
    let (status, body) = send(
        &app,
        "POST",
        "/v1/query",
        Some(json!({"action": "compare", "service_ids": ["SERVICE-A", "SERVICE-Z"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["not_found"], json!(["SERVICE-Z"]));
}

#[tokio::test]
async fn test_failed_refresh_is_bad_gateway() {
    let (fake, _kb, app) = setup();
    fake.fail_services(true);

    let (status, body) = send(&app, "POST", "/v1/refresh", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["kind"], "fatal");
    assert_eq!(body["stage"], "list_services");

    let (_, status_body) = send(&app, "GET", "/v1/status", None).await;
    assert_eq!(status_body["ready"], false);
    assert!(status_body["last_error"].as_str().unwrap().contains("service list"));
}

#[tokio::test]
async fn test_stats_after_refresh() {
    let (_fake, kb, app) = setup();
    kb.refresh().await.unwrap();

    let (status, body) = send(&app, "GET", "/v1/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_services"], 2);
    assert_eq!(body["degraded_services"], 0);

    let (_, status_body) = send(&app, "GET", "/v1/status", None).await;
    assert_eq!(status_body["generation"], 1);
    assert_eq!(status_body["source"], "fake");
    assert_eq!(status_body["building"], false);
}

#[tokio::test]
async fn test_invalid_condition_is_bad_request() {
    let (_fake, kb, app) = setup();
    kb.refresh().await.unwrap();

    let (status, body) = send(
        &app,
        "POST",
        "/v1/query",
        Some(json!({"action": "filter", "condition": "error_count >"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_predicate");
    assert_eq!(body["code"], -32012);

    let nested = format!("{}error_count > 1", "not ".repeat(200_000));
    let (status, body) = send(
        &app,
        "POST",
        "/v1/query",
        Some(json!({"action": "count", "condition": nested})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_predicate");
}

#[tokio::test]
async fn test_malformed_query_body_is_bad_request() {
    let (_fake, _kb, app) = setup();

    for body in [
        json!({"action": "explode"}),
        json!({"action": "rank"}),
        json!({"action": "filter", "predicate": {"type": "compare", "metric": "errors"}}),
    ] {
        let (status, reply) = send(&app, "POST", "/v1/query", Some(body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
        assert_eq!(reply["kind"], "invalid_query");
        assert_eq!(reply["code"], -32014);
    }
}

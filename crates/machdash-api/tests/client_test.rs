#![allow(clippy::unwrap_used)]
// Integration tests for `TelemetryClient` using wiremock.

use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use machdash_api::{Error, TelemetryClient, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, TelemetryClient) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let client = TelemetryClient::new(base_url, &TransportConfig::default()).unwrap();
    (server, client)
}

// ── Catalog endpoints ───────────────────────────────────────────────

#[tokio::test]
async fn test_list_machines() {
    let (server, client) = setup().await;

    let body = json!([
        { "machine_id": "m-001", "name": "Press A", "location": "Hall 1", "status": "running" },
        { "machine_id": "m-002", "name": "Lathe B", "status": "idle" }
    ]);

    Mock::given(method("GET"))
        .and(path("/machines"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let machines = client.machines().await.unwrap();

    assert_eq!(machines.len(), 2);
    assert_eq!(machines[0].machine_id, "m-001");
    assert_eq!(machines[0].location.as_deref(), Some("Hall 1"));
    assert_eq!(machines[1].location, None);
    assert_eq!(machines[1].status, "idle");
}

#[tokio::test]
async fn test_list_metric_defs() {
    let (server, client) = setup().await;

    let body = json!([
        { "metric_key": "temperature", "display_name": "Temperature", "unit": "°C" },
        { "metric_key": "pressure", "display_name": "Pressure", "unit": "bar" }
    ]);

    Mock::given(method("GET"))
        .and(path("/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let defs = client.metric_defs().await.unwrap();

    assert_eq!(defs.len(), 2);
    assert_eq!(defs[0].metric_key, "temperature");
    assert_eq!(defs[1].unit, "bar");
}

// ── Reading endpoints ───────────────────────────────────────────────

#[tokio::test]
async fn test_latest_readings() {
    let (server, client) = setup().await;

    let body = json!([
        { "machine_id": "m-001", "metric_key": "temperature", "ts_ms": 1_700_000_000_000_i64, "value": 71.5 }
    ]);

    Mock::given(method("GET"))
        .and(path("/latest"))
        .and(query_param("machine_id", "m-001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let readings = client.latest("m-001").await.unwrap();

    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].metric_key, "temperature");
    assert_eq!(readings[0].ts_ms, 1_700_000_000_000);
    assert!((readings[0].value - 71.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_history_with_bounds() {
    let (server, client) = setup().await;

    let body = json!([
        { "ts_ms": 1000, "value": 1.0 },
        { "ts_ms": 2000, "value": 2.0 }
    ]);

    Mock::given(method("GET"))
        .and(path("/history"))
        .and(query_param("machine_id", "m-001"))
        .and(query_param("metric_key", "temperature"))
        .and(query_param("limit", "500"))
        .and(query_param("start_ms", "1000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let points = client
        .history("m-001", "temperature", Some(1000), None, 500)
        .await
        .unwrap();

    assert_eq!(points.len(), 2);
    assert_eq!(points[0].ts_ms, 1000);
    assert_eq!(points[1].ts_ms, 2000);
}

#[tokio::test]
async fn test_distribution() {
    let (server, client) = setup().await;

    let body = json!({ "good": 400, "okay": 150, "bad": 50, "window_seconds": 600 });

    Mock::given(method("GET"))
        .and(path("/metrics/abc-123/distribution"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let dist = client.distribution("abc-123").await.unwrap();

    assert_eq!(dist.good, 400);
    assert_eq!(dist.okay, 150);
    assert_eq!(dist.bad, 50);
    assert_eq!(dist.window_seconds, Some(600));
}

// ── Error mapping ───────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_machine_maps_to_http_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Unknown machine_id"))
        .mount(&server)
        .await;

    let result = client.latest("nope").await;

    match result {
        Err(Error::Http { status: 404, .. }) => {}
        other => panic!("expected Http 404, got: {other:?}"),
    }
    assert!(result.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/machines"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = client.machines().await.unwrap_err();
    assert!(matches!(err, Error::Http { status: 500, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_malformed_body_maps_to_deserialization() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/machines"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client.machines().await.unwrap_err();
    match err {
        Error::Deserialization { ref body, .. } => assert_eq!(body, "not json"),
        other => panic!("expected Deserialization, got: {other:?}"),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_preview_mode_never_hits_network() {
    let client = TelemetryClient::preview();

    let err = client.machines().await.unwrap_err();
    assert!(matches!(err, Error::PreviewSkip));
    assert!(!err.is_transient());
}

//! End-to-end request pipeline tests against a mock REST backend.

use serde_json::{json, Value};
use std::sync::Arc;

use freight_link::api::{ApiRequest, HttpTransport};
use freight_link::observability::MemoryReporter;
use freight_link::resilience::CircuitState;
use freight_link::session::{HeadlessNavigator, Navigator};
use freight_link::{ClientError, FreightClient};

mod common;

#[tokio::test]
async fn test_recovers_from_transient_503s() {
    let api = common::start_programmable_api(|call| {
        if call < 2 {
            (503, json!({"message": "Service Unavailable"}))
        } else {
            (200, json!({"loads": [{"id": "L-1"}]}))
        }
    })
    .await;
    let client = FreightClient::new(common::client_config(&api.base_url(), None)).unwrap();
    client.session().begin("tok-1", None);

    let body: Value = client.get_json("/loads").await.unwrap();

    assert_eq!(body["loads"][0]["id"], "L-1");
    assert_eq!(api.calls(), 3);
    let seen = api.seen();
    assert!(seen.iter().all(|r| r.path == "/api/loads"));
    assert!(seen.iter().all(|r| r.authorization.as_deref() == Some("Bearer tok-1")));
    let first_id = seen[0].request_id.clone();
    assert!(first_id.is_some());
    assert!(seen.iter().all(|r| r.request_id == first_id));
    assert_eq!(client.pipeline().breaker().failure_count(), 0);
}

#[tokio::test]
async fn test_unauthorized_wipes_session_and_redirects() {
    let api = common::start_programmable_api(|_| (401, json!({"message": "jwt expired"}))).await;
    let navigator = Arc::new(HeadlessNavigator::new("/login"));
    navigator.set_current_path("/shipments");
    let config = common::client_config(&api.base_url(), None);
    let transport = HttpTransport::new(&config.api).unwrap();
    let client =
        FreightClient::with_collaborators(config, transport, navigator.clone(), Arc::new(MemoryReporter::new()))
            .unwrap();
    client.login("tok-1", Some(json!({"name": "Carrier One"})));

    let err = client.get_json::<Value>("/shipments").await.unwrap_err();

    assert_eq!(err, ClientError::AuthExpired);
    assert_eq!(api.calls(), 1);
    assert!(!client.session().is_authenticated());
    assert!(client.session().profile().is_none());
    assert_eq!(navigator.current_path(), "/login");
    assert_eq!(navigator.redirect_count(), 1);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let api = common::start_programmable_api(|_| (404, json!({"message": "Load not found"}))).await;
    let reporter = Arc::new(MemoryReporter::new());
    let config = common::client_config(&api.base_url(), None);
    let transport = HttpTransport::new(&config.api).unwrap();
    let client =
        FreightClient::with_collaborators(config, transport, Arc::new(HeadlessNavigator::new("/login")), reporter.clone())
            .unwrap();

    let err = client.request(&ApiRequest::get("/loads/missing")).await.unwrap_err();

    assert_eq!(
        err,
        ClientError::Http {
            status: 404,
            message: "Load not found".into()
        }
    );
    assert_eq!(api.calls(), 1);
    assert_eq!(reporter.recent()[0].context.label, "api_request");
}

#[tokio::test]
async fn test_circuit_opens_under_sustained_failure() {
    let api = common::start_programmable_api(|_| (503, json!({"message": "down"}))).await;
    let mut config = common::client_config(&api.base_url(), None);
    config.circuit_breakers.api.failure_threshold = 2;
    config.retries.max_retries = 1;
    let client = FreightClient::new(config).unwrap();

    for _ in 0..2 {
        let err = client.request(&ApiRequest::get("/loads")).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
    }
    assert_eq!(client.pipeline().breaker().state(), CircuitState::Open);

    let err = client.request(&ApiRequest::get("/loads")).await.unwrap_err();

    assert_eq!(err, ClientError::CircuitOpen { dependency: "api".into() });
    // Two logical calls of three attempts each, then one direct attempt.
    assert_eq!(api.calls(), 7);
    assert!(err.user_message().contains("temporarily unavailable"));
}

#[tokio::test]
async fn test_network_errors_are_retried_then_surfaced() {
    let addr = common::unused_addr().await;
    let mut config = common::client_config(&format!("http://{}/api", addr), None);
    config.retries.max_retries = 2;
    let client = FreightClient::new(config).unwrap();

    let err = client.request(&ApiRequest::get("/loads")).await.unwrap_err();

    assert!(matches!(err, ClientError::Network { .. }), "unexpected error: {:?}", err);
    assert_eq!(client.pipeline().breaker().failure_count(), 1);
}

#[tokio::test]
async fn test_post_sends_json_body() {
    let api = common::start_programmable_api(|_| (201, json!({"id": "L-9"}))).await;
    let client = FreightClient::new(common::client_config(&api.base_url(), None)).unwrap();

    let response = client
        .request(&ApiRequest::post("/loads", json!({"origin": "Austin", "destination": "Denver"})))
        .await
        .unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.body["id"], "L-9");
    assert!(api.seen()[0].authorization.is_none());
}

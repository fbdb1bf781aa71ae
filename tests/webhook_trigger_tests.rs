//! Webhook trigger client against a mock HTTP server.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hookrelay::config::RelayConfig;
use hookrelay::error::TriggerError;
use hookrelay::trigger::{Trigger, WebhookTrigger};
use hookrelay::types::{Agent, AgentId, HttpMethod};

fn agent(server: &MockServer, method: HttpMethod, payload: Option<&str>) -> Agent {
    Agent::builder()
        .id(AgentId::from("report"))
        .name("Report".to_string())
        .webhook_url(format!("{}/webhook/report", server.uri()))
        .method(method)
        .maybe_payload(payload.map(str::to_string))
        .build()
}

fn trigger() -> WebhookTrigger {
    WebhookTrigger::new(&RelayConfig::default().with_trigger_source("tests"))
}

#[tokio::test]
async fn post_sends_json_body_and_returns_stream_address() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook/report"))
        .and(header("content-type", "application/json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"sseUrl": "https://flows.test/s/1"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let address = trigger()
        .trigger(&agent(&server, HttpMethod::Post, Some(r#"{"region":"eu","source":"x"}"#)))
        .await
        .unwrap();
    assert_eq!(address.as_str(), "https://flows.test/s/1");

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["source"], "tests");
    assert_eq!(body["region"], "eu");
    let timestamp = body["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    assert!(timestamp.ends_with('Z'));
}

#[tokio::test]
async fn get_sends_fields_as_query_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/webhook/report"))
        .and(query_param("source", "tests"))
        .and(query_param("limit", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sseUrl": "/events/9"})))
        .expect(1)
        .mount(&server)
        .await;

    let address = trigger()
        .trigger(&agent(&server, HttpMethod::Get, Some(r#"{"limit":5}"#)))
        .await
        .unwrap();

    assert_eq!(address.as_str(), format!("{}/events/9", server.uri()));
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such workflow"))
        .mount(&server)
        .await;

    let err = trigger()
        .trigger(&agent(&server, HttpMethod::Post, None))
        .await
        .unwrap_err();

    assert_eq!(err, TriggerError::HttpStatus(404));
}

#[tokio::test]
async fn missing_stream_field_is_an_actionable_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"foo": "bar"})))
        .mount(&server)
        .await;

    let err = trigger()
        .trigger(&agent(&server, HttpMethod::Post, None))
        .await
        .unwrap_err();

    assert!(matches!(err, TriggerError::MissingStreamAddress { .. }));
    assert!(err.to_string().contains("sseUrl"));
}

#[tokio::test]
async fn non_json_response_is_treated_as_missing_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Workflow was started"))
        .mount(&server)
        .await;

    let err = trigger()
        .trigger(&agent(&server, HttpMethod::Post, None))
        .await
        .unwrap_err();

    assert!(matches!(err, TriggerError::MissingStreamAddress { .. }));
}

#[tokio::test]
async fn slow_webhook_times_out_as_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"sseUrl": "https://flows.test/s/1"}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let trigger = WebhookTrigger::new(
        &RelayConfig::default().with_trigger_timeout(Duration::from_millis(100)),
    );
    let err = trigger
        .trigger(&agent(&server, HttpMethod::Post, None))
        .await
        .unwrap_err();

    match err {
        TriggerError::Network(detail) => assert!(detail.contains("timed out"), "{detail}"),
        other => panic!("expected a network error, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_webhook_is_a_network_error() {
    let agent = Agent::builder()
        .id(AgentId::from("down"))
        .name("Down".to_string())
        .webhook_url("http://127.0.0.1:9/webhook".to_string())
        .build();

    let err = trigger().trigger(&agent).await.unwrap_err();

    assert!(matches!(err, TriggerError::Network(_)), "{err:?}");
}

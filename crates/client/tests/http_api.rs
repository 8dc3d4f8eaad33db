//! HTTP job service against a mock server.

use std::sync::Arc;

use assert_matches::assert_matches;
use jobpulse_client::api::{HttpJobService, JobService, StaticTokenProvider, CSRF_HEADER};
use jobpulse_core::classify::{classify, ErrorKind};
use jobpulse_core::job::JobStatus;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn status_falls_through_to_next_route_alias() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/progress/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "status": "running",
            "percent_complete": 42,
            "current_operation": "Matching answers to rubric",
            "start_time": 1_700_000_000.5,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let service = HttpJobService::new(server.uri());
    let snapshot = service.fetch_status("job-1").await.unwrap();

    assert_eq!(snapshot.status, Some(JobStatus::Processing));
    assert_eq!(snapshot.percentage, Some(42.0));
    assert_eq!(
        snapshot.current_operation.as_deref(),
        Some("Matching answers to rubric")
    );
    assert!(snapshot.start_time.is_some());
}

#[tokio::test]
async fn preferred_route_wins_when_available() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/progress/job-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "processing", "percentage": 7})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/progress/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"percentage": 99})))
        .expect(0)
        .mount(&server)
        .await;

    let snapshot = HttpJobService::new(server.uri())
        .fetch_status("job-1")
        .await
        .unwrap();
    assert_eq!(snapshot.percentage, Some(7.0));
}

#[tokio::test]
async fn server_errors_on_every_route_classify_as_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let raw = HttpJobService::new(server.uri())
        .fetch_status("job-1")
        .await
        .unwrap_err();
    assert_eq!(raw.status, Some(502));
    assert_eq!(classify(&raw).kind(), ErrorKind::Server);
}

#[tokio::test]
async fn unsuccessful_status_body_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/progress/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "Invalid progress id",
        })))
        .mount(&server)
        .await;

    let raw = HttpJobService::new(server.uri())
        .fetch_status("job-1")
        .await
        .unwrap_err();
    assert_eq!(raw.message, "Invalid progress id");
    assert_eq!(classify(&raw).kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    let raw = HttpJobService::new("http://127.0.0.1:9")
        .fetch_status("job-1")
        .await
        .unwrap_err();
    assert_eq!(classify(&raw).kind(), ErrorKind::Network);
}

#[tokio::test]
async fn cancel_sends_csrf_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cancel/job-1"))
        .and(header(CSRF_HEADER, "tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let service = HttpJobService::new(server.uri())
        .with_auth(Arc::new(StaticTokenProvider("tok-123".into())));
    service.cancel("job-1").await.unwrap();
}

#[tokio::test]
async fn rejected_cancel_carries_server_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cancel/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "job already finished",
        })))
        .mount(&server)
        .await;

    let raw = HttpJobService::new(server.uri())
        .cancel("job-1")
        .await
        .unwrap_err();
    assert_eq!(raw.message, "job already finished");
}

#[tokio::test]
async fn create_returns_progress_id() {
    let server = MockServer::start().await;
    let request = json!({"document": "essay.pdf", "rubric": "r-1"});
    Mock::given(method("POST"))
        .and(path("/process"))
        .and(body_json(&request))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "progress_id": "job-7"})),
        )
        .mount(&server)
        .await;

    let id = HttpJobService::new(server.uri())
        .create(&request)
        .await
        .unwrap();
    assert_eq!(id, "job-7");
}

#[tokio::test]
async fn create_rejects_auth_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/process"))
        .respond_with(ResponseTemplate::new(401).set_body_string("session expired"))
        .mount(&server)
        .await;

    let raw = HttpJobService::new(server.uri())
        .create(&json!({}))
        .await
        .unwrap_err();
    assert_matches!(raw.status, Some(401));
    let error = classify(&raw);
    assert_eq!(error.kind(), ErrorKind::Authentication);
    assert!(!error.recoverable());
}

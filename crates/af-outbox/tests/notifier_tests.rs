//! Dead-letter callback tests against a mock HTTP server

use std::sync::Arc;
use std::time::{Duration, Instant};

use nonzero_ext::nonzero;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use af_common::DeadLetter;
use af_outbox::{HttpClientConfig, NotifyError, ReqwestHttpClient, TaskNotifier};

fn letter(apply_id: &str) -> DeadLetter {
    DeadLetter {
        message_id: "msg-1".to_string(),
        topic: "automation.step".to_string(),
        apply_id: Some(apply_id.to_string()),
        attempts: 6,
        last_error: "bus unavailable".to_string(),
    }
}

fn notifier(server: &MockServer, per_second: std::num::NonZeroU32) -> TaskNotifier {
    let client = ReqwestHttpClient::new(HttpClientConfig::default()).unwrap();
    TaskNotifier::new(
        Arc::new(client),
        server.uri(),
        "/api/automation/v1/task/{apply_id}",
        per_second,
    )
}

#[tokio::test]
async fn test_posts_failure_notice_to_owning_task() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/automation/v1/task/task-42"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(serde_json::json!({
            "status": "failed",
            "result": { "message_id": "msg-1", "attempts": 6 }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    notifier(&server, nonzero!(10u32))
        .notify("task-42", &letter("task-42"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_non_success_status_is_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
        .mount(&server)
        .await;

    let err = notifier(&server, nonzero!(10u32))
        .notify("task-1", &letter("task-1"))
        .await
        .unwrap_err();

    match err {
        NotifyError::Rejected { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "try later");
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport_error() {
    let client = ReqwestHttpClient::new(HttpClientConfig {
        connect_timeout: Duration::from_millis(200),
        request_timeout: Duration::from_millis(500),
    })
    .unwrap();
    let notifier = TaskNotifier::new(
        Arc::new(client),
        "http://127.0.0.1:1",
        "/task/{apply_id}",
        nonzero!(10u32),
    );

    let err = notifier.notify("task-1", &letter("task-1")).await.unwrap_err();
    assert!(matches!(err, NotifyError::Transport(_)));
}

#[tokio::test]
async fn test_notifications_are_throttled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&server)
        .await;

    let notifier = notifier(&server, nonzero!(1u32));
    let started = Instant::now();
    notifier.notify("a", &letter("a")).await.unwrap();
    notifier.notify("b", &letter("b")).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(900));
}

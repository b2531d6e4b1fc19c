mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, init_logging, RecordingObserver, Seen};
use opwatch_core::{LifecycleState, MonitorOutcome};
use opwatch_engine::{MonitorRegistry, MonitorSettings};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn connect(server: &MockServer) -> (MonitorRegistry, Arc<RecordingObserver>) {
    init_logging();
    let settings = MonitorSettings {
        default_poll_interval: Duration::from_millis(20),
        ..MonitorSettings::default()
    }
    .with_base_url(server.uri());
    let observer = RecordingObserver::new();
    let registry = MonitorRegistry::connect(settings, observer.clone()).expect("valid settings");
    (registry, observer)
}

async fn requests_to(server: &MockServer, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == route)
        .count()
}

async fn mount_status(server: &MockServer, body: serde_json::Value, times: Option<u64>) {
    let mock = Mock::given(method("GET"))
        .and(path("/api/background-update/status/bg-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body));
    let mock = match times {
        Some(times) => mock.up_to_n_times(times),
        None => mock,
    };
    mock.mount(server).await;
}

#[tokio::test]
async fn event_stream_completes_upload() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"status\":\"starting\",\"message\":\"Starting\",\"progress\":0}\n\n",
        "data: not json\n\n",
        "data: {\"status\":\"saving\",\"message\":\"Saving\",\"progress\":75}\n\n",
        "data: {\"status\":\"completed\",\"message\":\"Upload finished\",\"progress\":100}\n\n",
    );
    Mock::given(method("GET"))
        .and(path("/api/upload/stream/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let (registry, observer) = connect(&server);
    let handle = registry.start_monitoring("upload", "job-1").await;
    assert_eq!(handle.wait().await, MonitorOutcome::Completed);

    assert_eq!(
        observer.events(),
        vec![
            Seen::Progress("upload".into(), Some(0.0)),
            Seen::Progress("upload".into(), Some(75.0)),
            Seen::Complete("upload".into(), "Upload finished".into()),
        ]
    );
    assert_eq!(registry.metrics().pull_channels_started(), 0);
    assert_eq!(requests_to(&server, "/api/upload/status/job-1").await, 0);
}

#[tokio::test]
async fn refused_stream_falls_back_to_polling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/background-update/stream/bg-1"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    for progress in [10.0, 45.0, 80.0] {
        mount_status(
            &server,
            json!({"status": "processing", "message": "Scanning", "progress": progress}),
            Some(1),
        )
        .await;
    }
    mount_status(
        &server,
        json!({"status": "completed", "message": "Update finished", "progress": 100}),
        None,
    )
    .await;

    let (registry, observer) = connect(&server);
    let handle = registry.start_monitoring("background-update", "bg-1").await;
    assert_eq!(handle.wait().await, MonitorOutcome::Completed);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        requests_to(&server, "/api/background-update/status/bg-1").await,
        4
    );
    assert_eq!(registry.metrics().pull_channels_started(), 1);
    assert_eq!(
        observer.events(),
        vec![
            Seen::Progress("background-update".into(), Some(10.0)),
            Seen::Progress("background-update".into(), Some(45.0)),
            Seen::Progress("background-update".into(), Some(80.0)),
            Seen::Complete("background-update".into(), "Update finished".into()),
        ]
    );
}

#[tokio::test]
async fn close_event_leaves_monitor_without_channel() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"status\":\"filtering\",\"message\":\"Filtering\",\"progress\":30}\n\n",
        "event: close\ndata: done streaming\n\n",
    );
    Mock::given(method("GET"))
        .and(path("/api/log-filter/stream/lf-1"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let (registry, _observer) = connect(&server);
    let handle = registry.start_monitoring("log-filter", "lf-1").await;
    eventually("stream close", || {
        let snapshot = handle.snapshot();
        snapshot.progress == Some(30.0) && snapshot.channel.is_none()
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(handle.lifecycle(), LifecycleState::Running);
    assert_eq!(registry.metrics().pull_channels_started(), 0);
    assert_eq!(requests_to(&server, "/api/log-filter/status/lf-1").await, 0);
    registry.shutdown().await;
}

#[tokio::test]
async fn cancel_over_http_ends_in_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/upload/stream/job-2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/upload/cancel/job-2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "message": "Cancellation requested"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/upload/status/job-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"status": "extracting", "message": "Extracting", "progress": 40}),
        ))
        .mount(&server)
        .await;

    let (registry, observer) = connect(&server);
    let handle = registry.start_monitoring("upload", "job-2").await;
    eventually("progress", || handle.snapshot().progress == Some(40.0)).await;

    let reply = handle.request_cancel().await.expect("cancel accepted");
    assert!(reply.success);
    Mock::given(method("GET"))
        .and(path("/api/upload/status/job-2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "cancelled", "message": "Cancelled by user"})),
        )
        .with_priority(1)
        .mount(&server)
        .await;

    assert_eq!(handle.wait().await, MonitorOutcome::Cancelled);
    assert_eq!(observer.count(|seen| matches!(seen, Seen::Error(..))), 0);
    assert!(observer.events().contains(&Seen::Cancelled(
        "upload".into(),
        "Cancelled by user".into()
    )));
}

//! Integration tests for the collector client against an in-process server.

use activity_agent::backend::{
    verify_employee, ActivityPayload, ActivityTransport, BackendConfig, BackendError,
    BlockingBackendClient, Registration,
};
use activity_agent::collector::noop::{NoopCollector, NoopWindowProbe};
use activity_agent::collector::CollectorConfig;
use activity_agent::config::Config;
use activity_agent::core::{AppUsage, BackendStatus, CurrentActivity, RunState};
use activity_agent::session::{ExitReason, NoopSessionControl, SessionController};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Received = Arc<Mutex<Vec<serde_json::Value>>>;

async fn employee(Path(id): Path<String>) -> StatusCode {
    match id.as_str() {
        "EMP-001" | "EMP-BROKEN" => StatusCode::OK,
        _ => StatusCode::NOT_FOUND,
    }
}

async fn activity(
    State(received): State<Received>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    let status = match body["employee_id"].as_str() {
        Some("EMP-001") => StatusCode::OK,
        Some("EMP-BROKEN") => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::NOT_FOUND,
    };
    received.lock().unwrap().push(body);
    status
}

async fn slow_activity() -> StatusCode {
    tokio::time::sleep(Duration::from_secs(2)).await;
    StatusCode::OK
}

/// Serve the collector contract on its own runtime thread.
fn spawn_collector() -> (SocketAddr, Received) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/employees/:id", get(employee))
        .route("/activity", post(activity))
        .route("/slow/activity", post(slow_activity))
        .with_state(Arc::clone(&received));

    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("Failed to create runtime");
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("Failed to bind");
            tx.send(listener.local_addr().expect("No local addr"))
                .expect("Failed to report address");
            axum::serve(listener, app).await.expect("Server failed");
        });
    });

    (rx.recv().expect("Server did not start"), received)
}

fn client(base_url: String, timeout: Duration) -> BlockingBackendClient {
    BlockingBackendClient::new(BackendConfig::new(base_url, timeout))
        .expect("Failed to create client")
}

fn payload(employee_id: &str) -> ActivityPayload {
    ActivityPayload {
        employee_id: employee_id.to_string(),
        timestamp: Utc::now().naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        active_seconds: 42,
        idle_seconds: 18,
        suspicious: false,
        active_app_exe: Some("code.exe".to_string()),
        active_app_title: None,
        current_app_started_at: Some(Utc::now()),
        current_activity: CurrentActivity::Typing,
        app_usage: vec![AppUsage {
            app_exe: Some("code.exe".to_string()),
            app_title: None,
            duration_seconds: 42.0,
            ended_at: None,
        }],
        keypresses: 120,
        mouse_clicks: 9,
        mouse_moves: 300,
        scrolls: 4,
        window_changes: 2,
        suspicious_events: Vec::new(),
        total_active_seconds: 42,
        total_idle_seconds: 18,
        total_keypresses: 120,
        total_mouse_events: 313,
        total_window_changes: 2,
    }
}

#[test]
fn test_post_activity_status_codes() {
    let (addr, received) = spawn_collector();
    let client = client(format!("http://{addr}"), Duration::from_secs(5));

    assert_eq!(client.post_activity(&payload("EMP-001")).unwrap(), 200);
    assert_eq!(client.post_activity(&payload("EMP-GONE")).unwrap(), 404);
    assert_eq!(client.post_activity(&payload("EMP-BROKEN")).unwrap(), 500);

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 3);
    let first = &received[0];
    assert_eq!(first["employee_id"], "EMP-001");
    assert_eq!(first["active_seconds"], 42);
    assert_eq!(first["idle_seconds"], 18);
    assert_eq!(first["suspicious"], false);
    assert_eq!(first["active_app_exe"], "code.exe");
    assert!(first["active_app_title"].is_null());
    assert_eq!(first["current_activity"], "typing");
    assert_eq!(first["app_usage"][0]["app_exe"], "code.exe");
    assert_eq!(first["app_usage"][0]["duration_seconds"], 42.0);
    assert!(!first["timestamp"].as_str().unwrap().ends_with('Z'));
}

#[test]
fn test_verify_employee() {
    let (addr, _) = spawn_collector();
    let client = client(format!("http://{addr}/"), Duration::from_secs(5));

    assert_eq!(
        verify_employee(&client, "EMP-001").unwrap(),
        Registration::Registered
    );
    assert_eq!(
        verify_employee(&client, "EMP-404").unwrap(),
        Registration::Unregistered
    );
}

#[test]
fn test_unreachable_collector() {
    // Bind and release a port so nothing is listening on it.
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let client = client(format!("http://{addr}"), Duration::from_secs(2));

    let err = client.post_activity(&payload("EMP-001")).unwrap_err();
    assert!(matches!(err, BackendError::Network(_) | BackendError::Timeout));
}

#[test]
fn test_request_timeout() {
    let (addr, _) = spawn_collector();
    let client = client(format!("http://{addr}/slow"), Duration::from_millis(200));

    let err = client.post_activity(&payload("EMP-001")).unwrap_err();
    assert!(matches!(err, BackendError::Timeout));
}

#[test]
fn test_controller_against_collector() {
    let (addr, received) = spawn_collector();
    let mut config = Config::default();
    config.backend_base_url = format!("http://{addr}");

    for (employee, expected_exit, expected_status) in [
        ("EMP-001", None, BackendStatus::Connected),
        ("EMP-BROKEN", None, BackendStatus::Error(500)),
        ("EMP-GONE", Some(ExitReason::Unregistered), BackendStatus::Unregistered),
    ] {
        let transport = client(config.backend_base_url.clone(), config.request_timeout());
        let now = Utc::now();
        let mut controller = SessionController::new(
            employee,
            &config,
            Box::new(NoopCollector::new(CollectorConfig::default())),
            Box::new(NoopWindowProbe),
            Box::new(transport),
            Box::new(NoopSessionControl::new()),
            now,
        );
        controller.start(now).unwrap();

        assert_eq!(controller.step(now), expected_exit);
        controller
            .accumulator()
            .with_state(|s| assert_eq!(s.backend_status, expected_status));
        let expected_state = if expected_exit.is_some() {
            RunState::Stopped
        } else {
            RunState::Running
        };
        assert_eq!(controller.run_state(), expected_state);
    }

    assert_eq!(received.lock().unwrap().len(), 3);
}

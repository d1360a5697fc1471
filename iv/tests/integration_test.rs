//! Integration tests for Interactview
//!
//! These tests drive the ingestion pipeline, the supervisor, the HTTP routes
//! and the CLI together against temporary source files.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_cmd::Command as CliCommand;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use interactview::broadcast::{Frame, Subscription, SubscriptionOptions};
use interactview::cache::EventCache;
use interactview::client::ApiClient;
use interactview::config::Config;
use interactview::server::{AppState, ControlRequest, router, run_server};
use interactview::supervisor::{StartOptions, Supervisor};
use interactview::tail::spawn_ingest;
use interactview::{CommandOutcome, ProducerRuntime, SupervisorError};
use predicates::prelude::*;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tower::ServiceExt;

const POLL: Duration = Duration::from_millis(20);

/// Runtime whose producer is a shell script
struct ScriptRuntime {
    script: String,
    alive: AtomicBool,
    launches: AtomicUsize,
}

impl ScriptRuntime {
    fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            alive: AtomicBool::new(false),
            launches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProducerRuntime for ScriptRuntime {
    fn name(&self) -> &str {
        "script"
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn launch(&self, _server: &str) -> Result<Child, SupervisorError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.alive.store(true, Ordering::SeqCst);
        Ok(Command::new("sh")
            .arg("-c")
            .arg(&self.script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?)
    }

    async fn remove(&self) -> CommandOutcome {
        self.alive.store(false, Ordering::SeqCst);
        CommandOutcome {
            ok: true,
            ..Default::default()
        }
    }
}

fn test_config(temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.data.dir = temp.path().to_path_buf();
    config.server.static_dir = temp.path().to_path_buf();
    config.server.bind = "127.0.0.1:0".to_string();
    config.ingest.poll_interval_ms = 20;
    config.producer.grace_period_secs = 1;
    config.producer.payload_wait_ms = 2000;
    config
}

async fn append_line(path: &Path, line: &str) {
    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await
        .unwrap();
    file.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    file.flush().await.unwrap();
}

/// Poll `check` until it holds or five seconds pass
async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..250 {
        if check() {
            return true;
        }
        tokio::time::sleep(POLL).await;
    }
    check()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// =============================================================================
// Ingestion Tests
// =============================================================================

#[tokio::test]
async fn test_ingest_fills_cache_from_appended_lines() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let path = temp.path().join("interactions.ndjson");
    std::fs::write(&path, "").unwrap();

    let cache = Arc::new(EventCache::new(500));
    let ingest = spawn_ingest(path.clone(), cache.clone(), POLL);
    // the cursor starts at the end of the file
    tokio::time::sleep(Duration::from_millis(200)).await;

    append_line(&path, r#"{"protocol":"dns","full-id":"abc.oast.pro","qtype":"A"}"#).await;
    append_line(&path, "not json").await;
    append_line(
        &path,
        r#"{"protocol":"http","remote-address":"10.0.0.9","raw-request":"GET /x HTTP/1.1\r\nHost: abc.oast.pro\r\n\r\n"}"#,
    )
    .await;

    assert!(eventually(|| cache.len() == 2).await, "both records should be cached");
    let events = cache.snapshot(10);
    assert_eq!(events[0].protocol, "DNS");
    assert_eq!(events[0].host, "abc.oast.pro");
    assert_eq!(events[1].source, "10.0.0.9");
    assert_eq!(events[1].http.as_ref().unwrap().path, "/x");
    assert_eq!(events[1].host, "abc.oast.pro");

    ingest.abort();
}

#[tokio::test]
async fn test_subscribers_see_only_new_events() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let path = temp.path().join("interactions.ndjson");
    std::fs::write(&path, "{\"protocol\":\"dns\",\"host\":\"old.oast.pro\"}\n").unwrap();

    let cache = Arc::new(EventCache::new(500));
    let options = SubscriptionOptions {
        poll_interval: POLL,
        ..Default::default()
    };
    let mut first = Subscription::attach(&path, cache.clone(), options).await.unwrap();
    let mut second = Subscription::attach(&path, cache.clone(), options).await.unwrap();
    assert_ne!(first.id(), second.id());

    append_line(&path, r#"{"protocol":"smtp","host":"new.oast.pro"}"#).await;

    for subscription in [&mut first, &mut second] {
        let frame = tokio::time::timeout(Duration::from_secs(5), subscription.next_frame())
            .await
            .expect("frame should arrive");
        match frame {
            Frame::Event(event) => {
                assert_eq!(event.protocol, "SMTP");
                assert_eq!(event.host, "new.oast.pro");
            }
            Frame::KeepAlive => panic!("expected an event frame"),
        }
    }
}

// =============================================================================
// Supervisor Tests
// =============================================================================

#[tokio::test]
async fn test_truncating_start_rewinds_ingestion() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = test_config(&temp);
    let path = config.source_file();
    std::fs::write(
        &path,
        "{\"protocol\":\"dns\",\"host\":\"a.oast.pro\"}\n{\"protocol\":\"dns\",\"host\":\"b.oast.pro\"}\n",
    )
    .unwrap();

    let cache = Arc::new(EventCache::new(500));
    assert_eq!(cache.warm_up(&path, 200).await, 2);
    let ingest = spawn_ingest(path.clone(), cache.clone(), POLL);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let script = format!(
        "echo '[INF] abcdefghij0123456789.oast.pro'; echo '{{\"protocol\":\"http\",\"host\":\"fresh.oast.pro\"}}' >> '{}'; sleep 30",
        path.display()
    );
    let runtime = Arc::new(ScriptRuntime::new(script));
    let supervisor = Supervisor::new(runtime.clone(), cache.clone(), &config).unwrap();

    let outcome = supervisor.start(StartOptions::default()).await.unwrap();
    assert_eq!(outcome.payload(), Some("abcdefghij0123456789.oast.pro"));

    assert!(
        eventually(|| cache.snapshot(10).iter().any(|e| e.host == "fresh.oast.pro")).await,
        "event written after truncation should be ingested"
    );
    let events = cache.snapshot(10);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].protocol, "HTTP");

    supervisor.stop().await;
    ingest.abort();
}

#[tokio::test]
async fn test_start_twice_reports_same_payload() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = test_config(&temp);
    let cache = Arc::new(EventCache::new(500));
    let runtime = Arc::new(ScriptRuntime::new(
        "echo 'client ready'; echo '[INF] qrstuvwxyz9876543210.oast.live'; sleep 30",
    ));
    let supervisor = Supervisor::new(runtime.clone(), cache, &config).unwrap();

    let first = supervisor.start(StartOptions::default()).await.unwrap();
    let second = supervisor.start(StartOptions::default()).await.unwrap();
    assert_eq!(first.payload(), Some("qrstuvwxyz9876543210.oast.live"));
    assert_eq!(first.payload(), second.payload());
    assert_eq!(runtime.launches.load(Ordering::SeqCst), 1);

    let status = supervisor.status().await;
    assert!(status.running);
    assert!(status.started_at.is_some());
    assert!(status.log_tail.iter().any(|line| line == "client ready"));

    supervisor.stop().await;
    let status = supervisor.status().await;
    assert!(!status.running);
    assert!(status.started_at.is_none());
}

// =============================================================================
// HTTP Tests
// =============================================================================

#[tokio::test]
async fn test_restart_empties_snapshot() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = test_config(&temp);
    std::fs::write(
        config.source_file(),
        "{\"protocol\":\"dns\",\"host\":\"a.oast.pro\"}\n{\"protocol\":\"http\",\"host\":\"b.oast.pro\"}\n",
    )
    .unwrap();

    let cache = Arc::new(EventCache::new(500));
    let runtime = Arc::new(ScriptRuntime::new("echo '[INF] abcdefghij0123456789.oast.pro'; sleep 30"));
    let supervisor = Arc::new(Supervisor::new(runtime, cache.clone(), &config).unwrap());
    let app = router(AppState::new(cache, supervisor.clone(), &config));

    let response = app
        .clone()
        .oneshot(Request::get("/api/last").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 2);

    let response = app
        .clone()
        .oneshot(
            Request::post("/api/restart")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"server":"https://oast.live"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["payload"], "abcdefghij0123456789.oast.pro");

    let response = app
        .oneshot(Request::get("/api/last").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_json(response).await, serde_json::json!([]));

    supervisor.stop().await;
}

#[tokio::test]
async fn test_client_round_trip() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = test_config(&temp);
    let path = config.source_file();
    std::fs::write(&path, "").unwrap();

    let cache = Arc::new(EventCache::new(500));
    let runtime = Arc::new(ScriptRuntime::new("echo '[INF] abcdefghij0123456789.oast.pro'; sleep 30"));
    let supervisor = Arc::new(Supervisor::new(runtime, cache.clone(), &config).unwrap());
    let state = AppState::new(cache, supervisor.clone(), &config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(run_server(listener, state, async move {
        let _ = shutdown_rx.await;
    }));

    let client = ApiClient::new(format!("http://{addr}")).unwrap();

    let request = ControlRequest {
        force: Some(false),
        truncate: Some(true),
        server: None,
    };
    let started = client.start(&request).await.unwrap();
    assert!(started.ok);
    assert_eq!(started.payload.as_deref(), Some("abcdefghij0123456789.oast.pro"));

    let status = client.status().await.unwrap();
    assert!(status.running);
    assert_eq!(status.payload.as_deref(), Some("abcdefghij0123456789.oast.pro"));

    let received = Arc::new(Mutex::new(Vec::new()));
    let follower = {
        let client = client.clone();
        let received = received.clone();
        tokio::spawn(async move {
            client
                .follow(move |event| received.lock().unwrap().push(event))
                .await
        })
    };

    // keep appending until the stream has attached and delivered one
    for _ in 0..50 {
        append_line(&path, r#"{"protocol":"dns","host":"live.oast.pro"}"#).await;
        if !received.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(received.lock().unwrap()[0].host, "live.oast.pro");

    let events = client.last().await.unwrap();
    assert!(events.iter().all(|event| event.host == "live.oast.pro"));

    client.stop().await.unwrap();
    assert!(!client.status().await.unwrap().running);

    shutdown_tx.send(()).unwrap();
    let followed = tokio::time::timeout(Duration::from_secs(5), follower)
        .await
        .expect("stream should end on shutdown")
        .unwrap();
    assert!(followed.is_ok());
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server should drain")
        .unwrap()
        .unwrap();
}

// =============================================================================
// CLI Tests
// =============================================================================

#[test]
fn test_cli_help_lists_runtimes() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    CliCommand::cargo_bin("iv")
        .unwrap()
        .env("HOME", temp.path())
        .env("XDG_DATA_HOME", temp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Container Runtimes"))
        .stdout(predicate::str::contains("interactview.log"));
}

#[test]
fn test_cli_status_without_server_fails() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    CliCommand::cargo_bin("iv")
        .unwrap()
        .env("HOME", temp.path())
        .env("XDG_DATA_HOME", temp.path())
        .env("XDG_CONFIG_HOME", temp.path())
        .current_dir(temp.path())
        .args(["status", "--url", "http://127.0.0.1:1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to reach"));
}

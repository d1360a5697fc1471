//! HTTP façade: live stream, snapshot and producer control

use std::convert::Infallible;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, StatusCode, Uri, header},
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
    routing::{get, post},
};
use eyre::{Context, Result};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::broadcast::{Frame, KEEPALIVE_COMMENT, Subscription, SubscriptionOptions};
use crate::cache::EventCache;
use crate::config::Config;
use crate::error::SupervisorError;
use crate::event::CanonicalEvent;
use crate::supervisor::{StartOptions, StartOutcome, Supervisor};

/// Events returned by the snapshot endpoint
pub const SNAPSHOT_SIZE: usize = 200;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    cache: Arc<EventCache>,
    supervisor: Arc<Supervisor>,
    source_file: PathBuf,
    subscription: SubscriptionOptions,
    warmup_lines: usize,
    static_dir: PathBuf,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(cache: Arc<EventCache>, supervisor: Arc<Supervisor>, config: &Config) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            cache,
            supervisor,
            source_file: config.source_file(),
            subscription: SubscriptionOptions {
                keepalive: config.stream.keepalive(),
                poll_interval: config.ingest.poll_interval(),
                writes_cache: config.ingest.subscriber_cache_writes,
            },
            warmup_lines: config.ingest.warmup_lines,
            static_dir: config.server.static_dir.clone(),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// End every open stream
    pub fn close_streams(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// Optional JSON body of the control endpoints
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlRequest {
    pub force: Option<bool>,
    pub truncate: Option<bool>,
    pub server: Option<String>,
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stream", get(stream))
        .route("/api/last", get(api_last))
        .route("/api/start", post(api_start))
        .route("/api/stop", post(api_stop))
        .route("/api/restart", post(api_restart))
        .route("/api/status", get(api_status))
        .route("/favicon.ico", get(favicon))
        .fallback(get(static_fallback))
        .with_state(state)
}

/// Serve until `signal` resolves, then close streams and drain connections
pub async fn run_server<F>(listener: TcpListener, state: AppState, signal: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().context("Failed to read listener address")?;
    info!(%addr, "HTTP server listening");

    let closer = state.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            signal.await;
            info!("Shutting down HTTP server");
            closer.close_streams();
        })
        .await
        .context("HTTP server failed")?;
    Ok(())
}

fn json_response<T: Serialize>(payload: T, status: StatusCode) -> Response {
    let mut response = Json(payload).into_response();
    *response.status_mut() = status;
    response
}

fn frame_event(frame: Frame) -> Event {
    match frame {
        Frame::Event(event) => {
            let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            Event::default().data(data)
        }
        Frame::KeepAlive => Event::default().comment(KEEPALIVE_COMMENT),
    }
}

async fn stream(State(state): State<AppState>) -> Response {
    let subscription = match Subscription::attach(&state.source_file, state.cache.clone(), state.subscription).await {
        Ok(subscription) => subscription,
        Err(e) => {
            error!(error = %e, "Failed to attach stream subscriber");
            return json_response(
                json!({"ok": false, "error": format!("failed to open source file: {e}")}),
                StatusCode::INTERNAL_SERVER_ERROR,
            );
        }
    };

    let mut shutdown = state.shutdown_rx.clone();
    let frames = subscription
        .into_stream()
        .take_until(async move {
            let _ = shutdown.wait_for(|closed| *closed).await;
        })
        .map(|frame| Ok::<_, Infallible>(frame_event(frame)));

    (
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform")),
            (HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no")),
        ],
        Sse::new(frames),
    )
        .into_response()
}

async fn api_last(State(state): State<AppState>) -> Json<Vec<CanonicalEvent>> {
    if state.cache.is_empty() {
        state.cache.warm_up(&state.source_file, state.warmup_lines).await;
    }
    Json(state.cache.snapshot(SNAPSHOT_SIZE))
}

fn launch_error(e: SupervisorError) -> Response {
    let status = if e.is_not_found() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    json_response(json!({"ok": false, "error": e.to_string()}), status)
}

fn start_response(outcome: StartOutcome) -> Response {
    let message = match &outcome {
        StartOutcome::AlreadyRunning { .. } => "Already running",
        StartOutcome::Started { .. } => "Producer started",
    };
    json_response(
        json!({"ok": true, "message": message, "payload": outcome.payload()}),
        StatusCode::OK,
    )
}

async fn api_start(State(state): State<AppState>, body: Option<Json<ControlRequest>>) -> Response {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    debug!(?request, "api_start: called");
    let options = StartOptions {
        server: request.server,
        truncate: request.truncate.unwrap_or(true),
        force: request.force.unwrap_or(false),
    };
    match state.supervisor.start(options).await {
        Ok(outcome) => start_response(outcome),
        Err(e) => launch_error(e),
    }
}

async fn api_stop(State(state): State<AppState>) -> Response {
    state.supervisor.stop().await;
    json_response(json!({"ok": true}), StatusCode::OK)
}

async fn api_restart(State(state): State<AppState>, body: Option<Json<ControlRequest>>) -> Response {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    debug!(?request, "api_restart: called");
    match state.supervisor.restart(request.server, request.truncate).await {
        Ok(outcome) => start_response(outcome),
        Err(e) => launch_error(e),
    }
}

async fn api_status(State(state): State<AppState>) -> Response {
    json_response(state.supervisor.status().await, StatusCode::OK)
}

async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn static_fallback(State(state): State<AppState>, uri: Uri) -> Response {
    let requested = uri.path();
    if requested.contains("..") {
        return json_response(json!({"ok": false, "error": "forbidden"}), StatusCode::FORBIDDEN);
    }

    let file_path = if requested == "/" || requested.is_empty() {
        state.static_dir.join("index.html")
    } else {
        state.static_dir.join(requested.trim_start_matches('/'))
    };

    let bytes = match tokio::fs::read(&file_path).await {
        Ok(bytes) => bytes,
        Err(_) => {
            debug!(?file_path, "static_fallback: not found");
            return json_response(json!({"ok": false, "error": "not found"}), StatusCode::NOT_FOUND);
        }
    };

    let content_type = mime_guess::from_path(&file_path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    let mut response = Response::new(Body::from(bytes));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type).unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    response
}

//! HTTP client for a running `iv serve`

use std::time::Duration;

use eyre::{Context, Result, eyre};
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::event::CanonicalEvent;
use crate::server::ControlRequest;
use crate::supervisor::StatusReport;

/// Body returned by the control endpoints
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ControlResponse {
    pub ok: bool,
    pub message: Option<String>,
    pub payload: Option<String>,
    pub error: Option<String>,
}

/// Base URL for reaching a server bound to `bind`
///
/// Wildcard listen addresses are reached through loopback.
pub fn base_url_from_bind(bind: &str) -> String {
    let (host, port) = match bind.rsplit_once(':') {
        Some((host, port)) => (host, port),
        None => (bind, "5000"),
    };
    let host = match host {
        "" | "0.0.0.0" => "127.0.0.1",
        "[::]" => "[::1]",
        other => other,
    };
    format!("http://{host}:{port}")
}

/// Thin client over the JSON and stream endpoints
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(%base_url, "ApiClient::new: called");
        // control calls can wait out a stop grace period and a payload wait
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn control(&self, path: &str, request: &ControlRequest) -> Result<ControlResponse> {
        debug!(path, ?request, "ApiClient::control: called");
        let response = self
            .http
            .post(self.url(path))
            .json(request)
            .send()
            .await
            .context(format!("Failed to reach {}", self.base_url))?;

        let status = response.status();
        let body: ControlResponse = response.json().await.context("Invalid control response")?;
        if !body.ok {
            let error = body.error.unwrap_or_else(|| status.to_string());
            return Err(eyre!("{} failed ({}): {}", path, status, error));
        }
        Ok(body)
    }

    pub async fn start(&self, request: &ControlRequest) -> Result<ControlResponse> {
        self.control("/api/start", request).await
    }

    pub async fn stop(&self) -> Result<ControlResponse> {
        self.control("/api/stop", &ControlRequest::default()).await
    }

    pub async fn restart(&self, request: &ControlRequest) -> Result<ControlResponse> {
        self.control("/api/restart", request).await
    }

    pub async fn status(&self) -> Result<StatusReport> {
        self.http
            .get(self.url("/api/status"))
            .send()
            .await
            .context(format!("Failed to reach {}", self.base_url))?
            .error_for_status()?
            .json()
            .await
            .context("Invalid status response")
    }

    pub async fn last(&self) -> Result<Vec<CanonicalEvent>> {
        self.http
            .get(self.url("/api/last"))
            .send()
            .await
            .context(format!("Failed to reach {}", self.base_url))?
            .error_for_status()?
            .json()
            .await
            .context("Invalid snapshot response")
    }

    /// Follow the live stream, calling `on_event` for every event until it ends
    pub async fn follow<F>(&self, mut on_event: F) -> Result<()>
    where
        F: FnMut(CanonicalEvent),
    {
        let mut es = EventSource::new(self.http.get(self.url("/stream"))).map_err(|e| eyre!(e.to_string()))?;

        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Open) => {
                    debug!("follow: Event::Open");
                }
                Ok(Event::Message(msg)) => match serde_json::from_str::<CanonicalEvent>(&msg.data) {
                    Ok(event) => on_event(event),
                    Err(e) => warn!(error = %e, "Skipping undecodable stream message"),
                },
                Err(reqwest_eventsource::Error::StreamEnded) => {
                    debug!("follow: stream ended");
                    es.close();
                    break;
                }
                Err(e) => {
                    es.close();
                    return Err(eyre!("Stream error: {}", e));
                }
            }
        }
        Ok(())
    }
}

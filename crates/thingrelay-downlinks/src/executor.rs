//! Downlink task execution.
//!
//! One execution: rewrite the time window, wait for the destination's rate
//! limiter, call the endpoint, normalise the body to JSON and publish it as
//! an `http-downlink` message from the downlink's thing. Everything after
//! the start shares one deadline.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use thingrelay_core::config::DownlinksConfig;
use thingrelay_core::message::PROTOCOL_HTTP_DOWNLINK;
use thingrelay_core::profile::JSON_CONTENT_TYPE;
use thingrelay_core::{format_message, Message, PubConfig, Result as RelayResult, SharedThings};
use thingrelay_messaging::Publisher;

use crate::error::{DownlinkError, Result};
use crate::limiter::HostRateLimiter;
use crate::model::Downlink;
use crate::scheduler::DownlinkRunner;
use crate::time_filter::{apply_time_filter, base_url};
use crate::xml::xml_to_json;

pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP seam.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[derive(Clone, Default)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| DownlinkError::Invalid(format!("method {}: {}", request.method, e)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse { status, headers, body })
    }
}

/// Counters for detached executions.
#[derive(Debug, Default)]
pub struct ExecutionStats {
    executed: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionSnapshot {
    pub executed: u64,
    pub published: u64,
    pub failed: u64,
}

impl ExecutionStats {
    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            executed: self.executed.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub struct DownlinkExecutor {
    things: SharedThings,
    publisher: Arc<dyn Publisher>,
    http: Arc<dyn HttpClient>,
    limiter: HostRateLimiter,
    timeout: Duration,
    stats: Arc<ExecutionStats>,
}

impl DownlinkExecutor {
    pub fn new(things: SharedThings, publisher: Arc<dyn Publisher>, http: Arc<dyn HttpClient>) -> Self {
        Self {
            things,
            publisher,
            http,
            limiter: HostRateLimiter::default(),
            timeout: DEFAULT_EXECUTION_TIMEOUT,
            stats: Arc::new(ExecutionStats::default()),
        }
    }

    /// Apply rate limit and deadline settings.
    pub fn with_config(mut self, config: &DownlinksConfig) -> Self {
        self.limiter = HostRateLimiter::new(config.rate_interval(), config.rate_burst);
        self.timeout = config.execution_timeout();
        self
    }

    pub fn stats(&self) -> Arc<ExecutionStats> {
        self.stats.clone()
    }

    /// Run one execution and return the published message.
    pub async fn execute(&self, downlink: &Downlink) -> RelayResult<Message> {
        let deadline = Instant::now() + self.timeout;

        let url = if downlink.time_filter.is_enabled() {
            let tz = downlink.scheduler.timezone()?;
            apply_time_filter(&downlink.url, &downlink.time_filter, tz, Utc::now())?
        } else {
            downlink.url.clone()
        };

        let key = base_url(&url)?;
        self.limiter.acquire(&key, deadline).await?;

        let request = HttpRequest {
            method: downlink.method.to_ascii_uppercase(),
            url,
            headers: downlink.headers.clone(),
            body: (!downlink.payload.is_empty()).then(|| downlink.payload.clone()),
        };
        debug!(downlink_id = %downlink.id, method = %request.method, url = %request.url, "Calling downlink endpoint");

        let response = timeout_at(deadline, self.http.send(request.clone()))
            .await
            .map_err(|_| DownlinkError::Timeout)??;
        let payload = normalize_response(&request, &response);

        let mut profile = self.things.get_config_by_thing(&downlink.thing_id).await?;
        profile.content_type = JSON_CONTENT_TYPE.to_string();

        let mut msg = Message::new(PROTOCOL_HTTP_DOWNLINK, "", payload);
        format_message(&PubConfig::new(downlink.thing_id.clone(), Some(profile)), &mut msg);
        self.publisher.publish(&msg).await?;
        Ok(msg)
    }
}

#[async_trait]
impl DownlinkRunner for DownlinkExecutor {
    async fn run(&self, downlink: &Downlink) {
        self.stats.executed.fetch_add(1, Ordering::Relaxed);
        match self.execute(downlink).await {
            Ok(_) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(downlink_id = %downlink.id, thing_id = %downlink.thing_id, error = %e, "Downlink execution failed");
            }
        }
    }
}

/// JSON bodies pass through, XML bodies are converted. Anything else, and
/// any non-2xx status, becomes a description of the failed call.
pub fn normalize_response(request: &HttpRequest, response: &HttpResponse) -> Vec<u8> {
    if response.is_success() {
        if serde_json::from_slice::<Value>(&response.body).is_ok() {
            return response.body.clone();
        }
        let converted = std::str::from_utf8(&response.body)
            .ok()
            .and_then(|text| xml_to_json(text).ok())
            .and_then(|value| serde_json::to_vec(&value).ok());
        if let Some(body) = converted {
            return body;
        }
    }

    let described = json!({
        "status": response.status,
        "headers": response.headers,
        "method": request.method,
        "url": request.url,
    });
    described.to_string().into_bytes()
}

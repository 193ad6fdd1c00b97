//! Snapshot delivery to the ingestion endpoint with bounded, fixed-delay retries.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::config::RetryPolicy;
use crate::error::TransportError;
use crate::types::{IngestPayload, MetricSnapshot};

/// A single POST of an already-serialized JSON payload.
#[async_trait]
pub trait IngestionSink: Send + Sync {
    async fn post(
        &self,
        url: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError>;
}

pub struct HttpSink {
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new() -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Other(format!("building http client: {e}")))?;
        Ok(Self { client })
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if let Some(status) = e.status() {
        TransportError::Status(status.as_u16())
    } else if e.is_connect() || e.is_request() || e.is_body() {
        // refused, reset, or closed by the peer mid-exchange
        TransportError::Connect(e.to_string())
    } else {
        // builder, redirect and decode errors
        TransportError::Other(e.to_string())
    }
}

#[async_trait]
impl IngestionSink for HttpSink {
    async fn post(
        &self,
        url: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let resp = self
            .client
            .post(url)
            .timeout(timeout)
            .body(payload.to_vec())
            .send()
            .await
            .map_err(classify)?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Status(status.as_u16()))
        }
    }
}

/// Ephemeral per-`send` retry bookkeeping.
#[derive(Debug)]
struct RetryState {
    attempt: u32,
    max_retries: u32,
    last_error: Option<TransportError>,
}

enum Step {
    Attempting,
    Backoff,
    Delivered,
    Exhausted,
    Abandoned,
}

pub struct Transmitter {
    sink: Arc<dyn IngestionSink>,
    policy: RetryPolicy,
}

impl Transmitter {
    pub fn new(sink: Arc<dyn IngestionSink>, policy: RetryPolicy) -> Self {
        Self { sink, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver `snapshot` to `endpoint`. `true` once accepted, `false` when
    /// retries are exhausted or a non-retryable failure occurs.
    pub async fn send(&self, snapshot: &MetricSnapshot, endpoint: &str) -> bool {
        let payload = IngestPayload {
            hostname: &snapshot.hostname,
            metrics: snapshot,
        };
        // serialized once; every attempt sends the same bytes
        let body = match serde_json::to_vec(&payload) {
            Ok(b) => b,
            Err(e) => {
                error!(
                    endpoint,
                    error = %TransportError::from(e),
                    "cannot serialize snapshot, dropping it"
                );
                return false;
            }
        };

        let mut state = RetryState {
            attempt: 1,
            max_retries: self.policy.max_retries.max(1),
            last_error: None,
        };
        let mut step = Step::Attempting;
        loop {
            step = match step {
                Step::Attempting => self.attempt(&mut state, endpoint, &body).await,
                Step::Backoff => {
                    sleep(self.policy.retry_delay).await;
                    state.attempt += 1;
                    Step::Attempting
                }
                Step::Delivered => return true,
                Step::Exhausted => {
                    error!(
                        endpoint,
                        attempts = state.max_retries,
                        last_error = state
                            .last_error
                            .as_ref()
                            .map(|e| e.to_string())
                            .unwrap_or_default(),
                        "failed to send metrics to {endpoint} after {} attempts",
                        state.max_retries
                    );
                    return false;
                }
                Step::Abandoned => return false,
            };
        }
    }

    async fn attempt(&self, state: &mut RetryState, endpoint: &str, body: &[u8]) -> Step {
        let started = Instant::now();
        let result = self.sink.post(endpoint, body, self.policy.timeout).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let attempt = state.attempt;
        let max = state.max_retries;

        match result {
            Ok(()) => {
                info!(attempt, duration_ms, bytes = body.len(), "metrics sent successfully");
                Step::Delivered
            }
            Err(e) if e.is_retryable() => {
                match &e {
                    TransportError::Status(status) => error!(
                        attempt,
                        max_retries = max,
                        duration_ms,
                        status,
                        "endpoint rejected metrics"
                    ),
                    _ => warn!(
                        attempt,
                        max_retries = max,
                        duration_ms,
                        error = %e,
                        "metrics delivery failed"
                    ),
                }
                state.last_error = Some(e);
                if attempt >= max {
                    Step::Exhausted
                } else {
                    Step::Backoff
                }
            }
            Err(e) => {
                error!(
                    attempt,
                    duration_ms,
                    endpoint,
                    error = %e,
                    "unexpected delivery failure, not retrying"
                );
                state.last_error = Some(e);
                Step::Abandoned
            }
        }
    }
}

//! Rate-limited, retrying fetch client.
//!
//! One logical fetch is up to `max_attempts` GETs. Every attempt first takes a
//! slot from the shared [`RateLimiter`]. 429/503/504 and transport failures are
//! retried after `base * 2^attempt`; any other non-200 status aborts at once.
//! The client never returns an error: failures come back as a
//! [`FetchOutcome`] variant so callers can count them separately from "no data".

use crate::limiter::RateLimiter;
use crate::row::RawRecord;
use crate::symbol::Symbol;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Longest slice of an error body included in logs.
const BODY_LOG_LIMIT: usize = 200;

/// Raw HTTP response as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Connection, timeout or body-read failure. Always retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Blocking GET with query parameters.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] over a blocking reqwest client with a fixed per-request timeout.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stocklake/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse, TransportError> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .map_err(|e| TransportError(e.without_url().to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .map_err(|e| TransportError(format!("reading body: {}", e.without_url())))?;
        Ok(HttpResponse { status, body })
    }
}

/// Attempt cap and exponential backoff base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    /// Delay after failed attempt `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 503 | 504)
}

/// Result of one logical fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// 200 with a parseable body; may be empty.
    Records(Vec<RawRecord>),
    /// Non-retryable, non-200 status.
    Rejected { status: u16 },
    /// Every attempt hit a retryable failure.
    Exhausted { attempts: u32, last_error: String },
    /// 200 whose body is not a JSON object, array or null.
    Malformed { reason: String },
}

impl FetchOutcome {
    /// Records on success; every failure reads as "no data".
    pub fn into_records(self) -> Vec<RawRecord> {
        match self {
            FetchOutcome::Records(records) => records,
            _ => Vec::new(),
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, FetchOutcome::Records(_))
    }
}

/// Parse a 200 body into records. Empty and `null` bodies are no records;
/// a single object is one record; non-object array items are skipped.
pub fn parse_records(body: &str) -> Result<Vec<RawRecord>, String> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Null) => Ok(Vec::new()),
        Ok(serde_json::Value::Object(map)) => Ok(vec![map]),
        Ok(serde_json::Value::Array(items)) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            })
            .collect()),
        Ok(other) => Err(format!("expected array or object, got {}", json_kind(&other))),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn body_prefix(body: &str) -> String {
    body.chars().take(BODY_LOG_LIMIT).collect()
}

/// Client for one provider: base URL, credential, shared limiter, retry policy.
#[derive(Clone)]
pub struct FetchClient {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    base_url: String,
    api_key: String,
    policy: RetryPolicy,
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient")
            .field("base_url", &self.base_url)
            .field("policy", &self.policy)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl FetchClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            limiter,
            base_url: base_url.into(),
            api_key: api_key.into(),
            policy,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// Fetch `endpoint` for one symbol.
    pub fn fetch_symbol(&self, endpoint: &str, symbol: &Symbol) -> FetchOutcome {
        self.fetch(endpoint, Some(symbol))
    }

    /// Fetch `endpoint`, with or without a `symbol` query parameter.
    pub fn fetch(&self, endpoint: &str, symbol: Option<&Symbol>) -> FetchOutcome {
        let url = self.url(endpoint);
        let label = symbol.map(Symbol::as_str).unwrap_or("-");
        let mut query: Vec<(&str, &str)> = Vec::with_capacity(2);
        if let Some(symbol) = symbol {
            query.push(("symbol", symbol.as_str()));
        }
        query.push(("apikey", self.api_key.as_str()));

        let attempts = self.policy.max_attempts;
        let mut last_error = String::new();

        for attempt in 0..attempts {
            self.limiter.acquire();

            let reason = match self.transport.get(&url, &query) {
                Ok(resp) if resp.status == 200 => {
                    return match parse_records(&resp.body) {
                        Ok(records) => FetchOutcome::Records(records),
                        Err(reason) => {
                            tracing::error!(symbol = label, endpoint, %reason, "malformed response body");
                            FetchOutcome::Malformed { reason }
                        }
                    };
                }
                Ok(resp) if is_retryable_status(resp.status) => format!("HTTP {}", resp.status),
                Ok(resp) => {
                    tracing::error!(
                        symbol = label,
                        endpoint,
                        status = resp.status,
                        body = %body_prefix(&resp.body),
                        "request rejected"
                    );
                    return FetchOutcome::Rejected {
                        status: resp.status,
                    };
                }
                Err(e) => e.to_string(),
            };

            if attempt + 1 < attempts {
                let delay = self.policy.delay(attempt);
                tracing::warn!(
                    symbol = label,
                    endpoint,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    %reason,
                    "retrying"
                );
                std::thread::sleep(delay);
            }
            last_error = reason;
        }

        tracing::warn!(symbol = label, endpoint, attempts, %last_error, "retries exhausted");
        FetchOutcome::Exhausted {
            attempts,
            last_error,
        }
    }
}

//! HttpClient middleware used by KeyRelayClient
//!
//! Responsible for
//!  - encoding upstream operations as query strings
//!  - one round trip per call (retries are the caller's policy)
//!  - logging/tracing
//!  - decoding json replies into `UpstreamResult`
//!  - metrics

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use reqwest::ClientBuilder;
use serde::Serialize;
use snafu::prelude::*;
use tracing::{debug, error, trace};

use crate::{
    Result,
    config::{DECODE_SNIPPET_LEN, OPERATION_PARAM, SELLER_KEY_PARAM},
    credentials::SellerKey,
    error::{KeyRelayError, TransportSnafu},
};

/// HTTP metrics tracked using atomic counters for thread-safe access.
/// These counters are cumulative and never reset during the client's lifetime.
#[derive(Debug, Default)]
pub struct HttpMetrics {
    /// Total number of requests sent upstream
    total_requests: AtomicU64,
    /// Responses decoded with `success: true`
    successful_responses: AtomicU64,
    /// Responses decoded with `success: false`
    rejections: AtomicU64,
    /// Connection-level failures
    transport_errors: AtomicU64,
    /// Responses that were not valid json
    decode_errors: AtomicU64,
    /// Total bytes received in response bodies
    bytes_received: AtomicU64,
}

impl HttpMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of current metrics as plain u64 values
    pub fn snapshot(&self) -> HttpMetricsSnapshot {
        HttpMetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_responses: self.successful_responses.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }

    fn increment(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn add_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of HTTP metrics with plain u64 values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HttpMetricsSnapshot {
    pub total_requests: u64,
    pub successful_responses: u64,
    pub rejections: u64,
    pub transport_errors: u64,
    pub decode_errors: u64,
    pub bytes_received: u64,
}

impl fmt::Display for HttpMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requests={} success={} rejected={} transport_err={} decode_err={} recv={}",
            self.total_requests,
            self.successful_responses,
            self.rejections,
            self.transport_errors,
            self.decode_errors,
            format_bytes(self.bytes_received),
        )
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes}B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Decoded reply of a single upstream call.
///
/// `success` and `message` are lifted out of the reply; `payload` holds the
/// whole json document so operation-specific fields (`keys`, `users`, `key`)
/// can be read by the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamResult {
    pub success: bool,
    pub message: Option<String>,
    pub payload: serde_json::Value,
}

impl UpstreamResult {
    pub(crate) fn from_payload(payload: serde_json::Value) -> Self {
        let success = match payload.get("success") {
            Some(serde_json::Value::Bool(flag)) => *flag,
            Some(serde_json::Value::String(text)) => text.eq_ignore_ascii_case("true"),
            _ => false,
        };
        let message = payload
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string);
        Self {
            success,
            message,
            payload,
        }
    }

    /// Converts a `success: false` reply into `UpstreamRejection`.
    pub fn into_result(self, operation: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(KeyRelayError::UpstreamRejection {
                operation: operation.to_string(),
                message: self
                    .message
                    .unwrap_or_else(|| "no message in response".to_string()),
            })
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct HttpRequest {
    pub operation: String,
    pub query: Vec<(String, String)>,
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // seller key is added at send time, so it never shows up here
        f.debug_struct("HttpRequest")
            .field("operation", &self.operation)
            .field("query", &self.query)
            .finish()
    }
}

impl HttpRequest {
    pub(crate) fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            query: Vec::new(),
        }
    }

    #[must_use]
    pub(crate) fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub(crate) fn param_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.param(key, value),
            None => self,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    pub client: reqwest::Client,

    /// Upstream endpoint, e.g. "https://keyauth.win/api/seller/"
    pub base_url: String,

    seller_key: SellerKey,

    /// HTTP request/response metrics
    pub metrics: Arc<HttpMetrics>,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder, base_url: String, seller_key: SellerKey) -> Result<Self> {
        let client = builder.build().context(TransportSnafu {
            operation: "client-init",
        })?;
        Ok(HttpClient {
            client,
            base_url,
            seller_key,
            metrics: Arc::new(HttpMetrics::new()),
        })
    }

    /// Returns a snapshot of current HTTP metrics
    pub fn metrics_snapshot(&self) -> HttpMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Returns true if a seller key has been configured.
    pub fn has_key(&self) -> bool {
        self.seller_key.has_creds()
    }

    /// Issues one upstream call and decodes the reply.
    ///
    /// - connection failures map to `Transport`
    /// - a body that is not json maps to `Decode`
    /// - a json body is returned as-is, whether `success` is true or false,
    ///   and regardless of http status code
    pub(crate) async fn send(&self, req: HttpRequest) -> Result<UpstreamResult> {
        if !self.has_key() {
            return Err(KeyRelayError::Validation {
                message: "seller key not set. Configure KEYRELAY_SELLER_KEY or --seller-key"
                    .to_string(),
            });
        }
        debug!(operation = %req.operation, "upstream request");
        log_request(&req);

        HttpMetrics::increment(&self.metrics.total_requests);
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                (SELLER_KEY_PARAM, self.seller_key.token()),
                (OPERATION_PARAM, req.operation.as_str()),
            ])
            .query(&req.query)
            .query(&[("format", "JSON")])
            .send()
            .await
            .map_err(|source| {
                // strip the url so the seller key never reaches logs or error messages
                let source = source.without_url();
                HttpMetrics::increment(&self.metrics.transport_errors);
                error!(?source, ?req, "http");
                KeyRelayError::Transport {
                    operation: req.operation.clone(),
                    source,
                }
            })?;

        let status = response.status();
        // the body is read fully; a read failure is a transport failure
        let body = response.bytes().await.map_err(|source| {
            HttpMetrics::increment(&self.metrics.transport_errors);
            KeyRelayError::Transport {
                operation: req.operation.clone(),
                source: source.without_url(),
            }
        })?;
        self.metrics.add_bytes_received(body_len(&body));
        log_response(&req.operation, status.as_u16(), &body);

        let payload = decode_json(&req.operation, &body).inspect_err(|_| {
            HttpMetrics::increment(&self.metrics.decode_errors);
        })?;
        let result = UpstreamResult::from_payload(payload);
        if result.success {
            HttpMetrics::increment(&self.metrics.successful_responses);
        } else {
            HttpMetrics::increment(&self.metrics.rejections);
            debug!(
                operation = %req.operation,
                status = status.as_u16(),
                message = result.message.as_deref().unwrap_or_default(),
                "upstream rejected request"
            );
        }
        Ok(result)
    }
}

fn body_len(body: &[u8]) -> u64 {
    u64::try_from(body.len()).unwrap_or(u64::MAX)
}

// dump request
// requires RUST_LOG=keyrelay::http_json=trace
fn log_request(req: &HttpRequest) {
    if tracing::enabled!(target: "keyrelay::http_json", tracing::Level::TRACE) {
        // don't log the seller key
        trace!(target: "keyrelay::http_json", "{} query={:?}", req.operation, req.query);
    }
}

// dump json response, for debugging
fn log_response(operation: &str, status: u16, body: &[u8]) {
    if tracing::enabled!(target: "keyrelay::http_json", tracing::Level::TRACE) {
        trace!(target: "keyrelay::http_json", "Response operation={operation} status={status} body={}",
            String::from_utf8_lossy(body)
        );
    }
}

/// Parses the body as json, reporting the start of the raw body on failure.
pub(crate) fn decode_json(operation: &str, body: &[u8]) -> Result<serde_json::Value> {
    serde_json::from_slice(body).map_err(|source| {
        let snippet = body_snippet(body);
        error!(operation, %snippet, "response is not valid json: {source}");
        KeyRelayError::Decode {
            operation: operation.to_string(),
            snippet,
            source,
        }
    })
}

/// First `DECODE_SNIPPET_LEN` characters of the body, lossily decoded.
fn body_snippet(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(DECODE_SNIPPET_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{UpstreamResult, body_snippet, decode_json};
    use crate::error::KeyRelayError;
    use serde_json::json;

    #[test]
    fn test_from_payload_success_flag() {
        let ok = UpstreamResult::from_payload(json!({"success": true, "message": "done"}));
        assert!(ok.success);
        assert_eq!(ok.message.as_deref(), Some("done"));

        let rejected = UpstreamResult::from_payload(json!({"success": false}));
        assert!(!rejected.success);
        assert_eq!(rejected.message, None);

        // some endpoints quote booleans
        let quoted = UpstreamResult::from_payload(json!({"success": "true"}));
        assert!(quoted.success);

        let missing = UpstreamResult::from_payload(json!({"keys": []}));
        assert!(!missing.success);
    }

    #[test]
    fn test_into_result_rejection() {
        let rejected =
            UpstreamResult::from_payload(json!({"success": false, "message": "Key not found"}));
        let err = rejected.into_result("ban").expect_err("should reject");
        match err {
            KeyRelayError::UpstreamRejection { operation, message } => {
                assert_eq!(operation, "ban");
                assert_eq!(message, "Key not found");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_decode_error_includes_bounded_snippet() {
        let body = format!("<html>{}</html>", "x".repeat(500));
        let err = decode_json("add", body.as_bytes()).expect_err("html is not json");
        match err {
            KeyRelayError::Decode { snippet, .. } => {
                assert_eq!(snippet.chars().count(), 200);
                assert!(snippet.starts_with("<html>"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_snippet_respects_char_boundaries() {
        let body = "é".repeat(300);
        assert_eq!(body_snippet(body.as_bytes()).chars().count(), 200);
    }
}

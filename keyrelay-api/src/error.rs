//! Errors returned by `KeyRelayClient` and `RestoreEngine`
//!
use snafu::prelude::*;

/// Errors returned by keyrelay crate
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum KeyRelayError {
    /// A restore request was rejected before any state changed:
    /// the license list was empty, not a list, or contained a record without a key.
    #[snafu(display("Invalid restore request: {message}"))]
    InvalidInput { message: String },

    /// A restore is already running. Only one restore job may run at a time.
    #[snafu(display("A restore is already in progress"))]
    AlreadyInProgress,

    // Connection-level failure (dns, tcp, tls, timeout, or body read)
    #[snafu(display("Transport error calling '{operation}': {source}"))]
    Transport {
        operation: String,
        source: reqwest::Error,
    },

    /// The upstream response body was not valid json.
    /// `snippet` holds the beginning of the raw body.
    #[snafu(display("Could not decode '{operation}' response: {source}. Body: {snippet}"))]
    Decode {
        operation: String,
        snippet: String,
        source: serde_json::Error,
    },

    /// Upstream returned a well-formed response with `success: false`.
    #[snafu(display("Upstream rejected '{operation}': {message}"))]
    UpstreamRejection { operation: String, message: String },

    /// Validation error: a client-side parameter check failed.
    #[snafu(display("Validation error: {message}"))]
    Validation { message: String },

    /// Serialization error. unlikely to occur. If you see this error, please report it as a bug.
    #[snafu(display("Serialization: {source}"))]
    Serialization { source: serde_json::Error },

    /// Some other error occurred
    #[snafu(display("{message}"))]
    Other { message: String },
}

impl KeyRelayError {
    /// Returns true for errors raised before the upstream produced a usable response
    /// (transport or decode). These are the failures the restore engine retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Decode { .. })
    }
}

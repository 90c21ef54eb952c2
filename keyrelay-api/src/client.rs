//! keyrelay API Client
//!
//! # Creating new api client
//!
//! - [new](KeyRelayClient::new) - create new client with a seller key and default configuration
//! - [with_config](KeyRelayClient::with_config) - create client with custom configuration
//! - [with_client](KeyRelayClient::with_client) - create client with configuration and custom reqwest client
//!
//! # Configuration
//!
//! - [get_config](KeyRelayClient::get_config) - returns configuration
//! - [http_metrics](KeyRelayClient::http_metrics) - returns upstream call counters
//!

use std::{sync::Arc, time::Duration};

use tracing::debug;

use crate::{
    DEFAULT_KEY_PREFIX, DEFAULT_UPSTREAM_URL, Result,
    config::{
        DEFAULT_REQUEST_TIMEOUT_SECS, KEYRELAY_KEY_PREFIX_ENV, KEYRELAY_SELLER_KEY_ENV,
        KEYRELAY_URL_ENV,
    },
    http_client::{HttpClient, HttpMetricsSnapshot},
    prelude::*,
};

/// Configuration for the client. Defines endpoint url, credential, and key prefix.
///
/// ```rust,no_run
/// use keyrelay::prelude::*;
/// # fn create_client() -> Result<KeyRelayClient, KeyRelayError> {
/// let config = ClientConfig::default()
///     .base_url("https://example.com/api/seller/")
///     .seller_key("my-seller-key");
/// let client = KeyRelayClient::with_config(config)?;
/// # Ok(client)
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upstream seller api endpoint.
    /// If not provided in config, url is determined by:
    /// * The environment variable `KEYRELAY_URL`, if defined, or
    /// * `keyrelay::DEFAULT_UPSTREAM_URL`
    pub base_url: String,

    /// Seller credential. Defaults to the environment variable `KEYRELAY_SELLER_KEY`.
    pub seller_key: SellerKey,

    /// Reserved prefix of product license keys, used by the backup parser.
    /// Defaults to `KEYRELAY_KEY_PREFIX` or `keyrelay::DEFAULT_KEY_PREFIX`.
    pub key_prefix: String,

    /// Timeout for one upstream round trip
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: std::env::var(KEYRELAY_URL_ENV)
                .unwrap_or_else(|_| DEFAULT_UPSTREAM_URL.to_string()),
            seller_key: std::env::var(KEYRELAY_SELLER_KEY_ENV)
                .map(SellerKey::new)
                .unwrap_or_default(),
            key_prefix: std::env::var(KEYRELAY_KEY_PREFIX_ENV)
                .unwrap_or_else(|_| DEFAULT_KEY_PREFIX.to_string()),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    /// Sets the upstream endpoint url.
    #[must_use]
    pub fn base_url(self, base_url: impl Into<String>) -> Self {
        ClientConfig {
            base_url: base_url.into(),
            ..self
        }
    }

    /// Sets the seller key.
    #[must_use]
    pub fn seller_key(self, seller_key: impl Into<SellerKey>) -> Self {
        ClientConfig {
            seller_key: seller_key.into(),
            ..self
        }
    }

    #[must_use]
    pub fn key_prefix(self, key_prefix: impl Into<String>) -> Self {
        ClientConfig {
            key_prefix: key_prefix.into(),
            ..self
        }
    }

    #[must_use]
    pub fn request_timeout(self, request_timeout: Duration) -> Self {
        ClientConfig {
            request_timeout,
            ..self
        }
    }
}

/// Client for the upstream license management api.
///
/// Cloning is cheap; clones share the connection pool and metrics.
#[derive(Clone)]
pub struct KeyRelayClient {
    pub(crate) client: Arc<HttpClient>,
    pub(crate) config: ClientConfig,
}

impl std::fmt::Debug for KeyRelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRelayClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl KeyRelayClient {
    /// Creates a new client with default configuration and the given seller key.
    pub fn new(seller_key: impl Into<SellerKey>) -> Result<Self> {
        Self::with_config(ClientConfig::default().seller_key(seller_key))
    }

    /// Creates a new client with the provided configuration.
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.request_timeout);
        Self::with_client(client, config)
    }

    /// Creates a client from a `reqwest::ClientBuilder` and configuration.
    /// ClientBuilder can be customized with timeouts, proxies, dns servers, user_agent, etc.
    pub fn with_client(client: reqwest::ClientBuilder, config: ClientConfig) -> Result<Self> {
        debug!(url=?config.base_url, "new client");
        let client = HttpClient::new(client, config.base_url.clone(), config.seller_key.clone())?;
        Ok(Self {
            client: Arc::new(client),
            config,
        })
    }

    /// Returns the configuration.
    pub fn get_config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns a backup parser using the configured key prefix.
    pub fn backup_parser(&self) -> BackupParser {
        BackupParser::new(&self.config.key_prefix)
    }

    /// Returns a snapshot of current HTTP metrics.
    pub fn http_metrics(&self) -> HttpMetricsSnapshot {
        self.client.metrics_snapshot()
    }

    /// Issues a raw upstream operation. Parameters are appended to the query string.
    ///
    /// Returns the decoded reply whether or not the upstream reported success;
    /// use [`UpstreamResult::into_result`] to turn a rejection into an error.
    pub async fn invoke(&self, operation: &str, params: &[(&str, String)]) -> Result<UpstreamResult> {
        let req = params.iter().fold(
            crate::http_client::HttpRequest::new(operation),
            |req, (key, value)| req.param(key, value),
        );
        self.client.send(req).await
    }
}

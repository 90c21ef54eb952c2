//! # Bulk restore
//!
//! Re-creates a list of [`LicenseRecord`]s against the upstream api in a
//! background task. One job runs at a time.
//!
//! - [start](RestoreEngine::start) - validate, reset progress, spawn the worker
//! - [reporter](RestoreEngine::reporter) - progress snapshots and stop requests
//!
//! Items are restored strictly in order, one upstream call at a time, with a
//! fixed pause after every item and a longer pause after every batch. Failed
//! calls are classified with [`classify_failure`]: duplicates are skipped,
//! rate-limit replies and transport errors are retried after a backoff, and
//! anything else fails the item.
//!
//! ```rust,no_run
//! use keyrelay::prelude::*;
//! # async fn example(client: KeyRelayClient) -> Result<(), KeyRelayError> {
//! let engine = RestoreEngine::new(client, RestoreConfig::default());
//! let records = vec![LicenseRecord::new("Soryn-AAAAA-1m")];
//! engine.start(RestoreRequest::new(records).wipe(false))?;
//! let status = engine.reporter();
//! while status.snapshot().running {
//!     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//! }
//! println!("{}", status.snapshot());
//! # Ok(())
//! # }
//! ```

use std::{
    future::Future,
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::{
    Result,
    client::KeyRelayClient,
    prelude::*,
    status::{COMPLETE_MARKER, RestoreShared, STOPPED_BY_USER},
};

const DEFAULT_ITEM_DELAY: Duration = Duration::from_millis(1500);
const DEFAULT_BATCH_SIZE: usize = 20;
const DEFAULT_BATCH_PAUSE: Duration = Duration::from_secs(5);
const DEFAULT_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(10);
const DEFAULT_TRANSPORT_BACKOFF: Duration = Duration::from_secs(5);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_WIPE_PAUSE: Duration = Duration::from_secs(2);

/// Upstream operations used by the restore worker.
///
/// Implemented by [`KeyRelayClient`]; tests substitute a scripted api.
pub trait LicenseApi: Send + Sync + 'static {
    /// Creates exactly `record.key`. A rejection is returned as `Ok` with
    /// `success == false` so the caller can classify it.
    fn restore_license(
        &self,
        record: &LicenseRecord,
        duration: LicenseDuration,
    ) -> impl Future<Output = Result<UpstreamResult>> + Send;

    /// Deletes every license.
    fn wipe_licenses(&self) -> impl Future<Output = Result<()>> + Send;

    /// Deletes every user.
    fn wipe_users(&self) -> impl Future<Output = Result<()>> + Send;
}

impl LicenseApi for KeyRelayClient {
    async fn restore_license(
        &self,
        record: &LicenseRecord,
        duration: LicenseDuration,
    ) -> Result<UpstreamResult> {
        KeyRelayClient::restore_license(self, record, duration).await
    }

    async fn wipe_licenses(&self) -> Result<()> {
        self.licenses().delete_all().await
    }

    async fn wipe_users(&self) -> Result<()> {
        self.users().delete_all().await
    }
}

/// How a failed create reply is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum FailureClass {
    /// The key already exists upstream. Counted as skipped.
    Duplicate,
    /// Upstream is throttling. Retried after the rate-limit backoff.
    RateLimited,
    /// Anything else. Counted as failed without retry.
    Terminal,
}

/// Classifies the message of a failed upstream reply.
///
/// Matching is case-insensitive on substrings:
///
/// - `already`, `duplicate` - [`FailureClass::Duplicate`]
/// - `limit`, `slow`, `too many`, or the word `rate` - [`FailureClass::RateLimited`]
/// - otherwise [`FailureClass::Terminal`]
///
/// Duplicate markers are checked first, so "key already exists, slow down" is a duplicate.
pub fn classify_failure(message: &str) -> FailureClass {
    let text = message.to_ascii_lowercase();
    if text.contains("already") || text.contains("duplicate") {
        return FailureClass::Duplicate;
    }
    let rate_word = text
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .any(|word| word == "rate");
    if rate_word
        || ["limit", "slow", "too many"]
            .iter()
            .any(|marker| text.contains(marker))
    {
        return FailureClass::RateLimited;
    }
    FailureClass::Terminal
}

/// Timing and retry settings of the restore worker.
#[derive(Debug, Clone)]
pub struct RestoreConfig {
    /// Pause after every item, whatever its outcome
    pub item_delay: Duration,
    /// Items per batch. Zero disables batch pauses.
    pub batch_size: usize,
    /// Extra pause after every `batch_size` items
    pub batch_pause: Duration,
    /// Wait before retrying a rate-limited create
    pub rate_limit_backoff: Duration,
    /// Wait before retrying after a transport or decode error
    pub transport_backoff: Duration,
    /// Upstream calls per item, including the first
    pub max_attempts: u32,
    /// Pause after each wipe call
    pub wipe_pause: Duration,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            item_delay: DEFAULT_ITEM_DELAY,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause: DEFAULT_BATCH_PAUSE,
            rate_limit_backoff: DEFAULT_RATE_LIMIT_BACKOFF,
            transport_backoff: DEFAULT_TRANSPORT_BACKOFF,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            wipe_pause: DEFAULT_WIPE_PAUSE,
        }
    }
}

impl RestoreConfig {
    /// Configuration with every pause set to zero. Retries are still attempted.
    pub fn no_delays() -> Self {
        Self {
            item_delay: Duration::ZERO,
            batch_pause: Duration::ZERO,
            rate_limit_backoff: Duration::ZERO,
            transport_backoff: Duration::ZERO,
            wipe_pause: Duration::ZERO,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn item_delay(self, item_delay: Duration) -> Self {
        Self { item_delay, ..self }
    }

    #[must_use]
    pub fn batch(self, batch_size: usize, batch_pause: Duration) -> Self {
        Self {
            batch_size,
            batch_pause,
            ..self
        }
    }

    #[must_use]
    pub fn backoff(self, rate_limit_backoff: Duration, transport_backoff: Duration) -> Self {
        Self {
            rate_limit_backoff,
            transport_backoff,
            ..self
        }
    }

    #[must_use]
    pub fn max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..self
        }
    }

    #[must_use]
    pub fn wipe_pause(self, wipe_pause: Duration) -> Self {
        Self { wipe_pause, ..self }
    }
}

/// Licenses to restore, and whether to wipe the upstream first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreRequest {
    pub licenses: Vec<LicenseRecord>,
    pub wipe: bool,
}

impl RestoreRequest {
    pub fn new(licenses: Vec<LicenseRecord>) -> Self {
        Self {
            licenses,
            wipe: false,
        }
    }

    /// Delete all licenses and users before restoring.
    #[must_use]
    pub fn wipe(self, wipe: bool) -> Self {
        Self { wipe, ..self }
    }

    /// Reads a request body of the form `{"licenses": [...], "wipe": bool}`.
    ///
    /// Fails with `InvalidInput` if `licenses` is missing or not a list, or if
    /// any entry lacks a key. `wipe` defaults to false.
    pub fn from_json(body: &serde_json::Value) -> Result<Self> {
        let Some(entries) = body.get("licenses").and_then(serde_json::Value::as_array) else {
            return Err(KeyRelayError::InvalidInput {
                message: "'licenses' must be a list".to_string(),
            });
        };
        let licenses = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                LicenseRecord::from_json(entry).ok_or_else(|| KeyRelayError::InvalidInput {
                    message: format!("license {index} has no key"),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let wipe = body
            .get("wipe")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        Ok(Self { licenses, wipe })
    }

    fn validate(&self) -> Result<()> {
        if self.licenses.is_empty() {
            return Err(KeyRelayError::InvalidInput {
                message: "no licenses to restore".to_string(),
            });
        }
        if let Some(index) = self
            .licenses
            .iter()
            .position(|record| record.key.trim().is_empty())
        {
            return Err(KeyRelayError::InvalidInput {
                message: format!("license {index} has no key"),
            });
        }
        Ok(())
    }
}

/// Returned by [`RestoreEngine::start`] once the job is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RestoreAck {
    pub total: usize,
}

/// Runs restore jobs against a [`LicenseApi`].
///
/// Cloning is cheap; clones share the same job.
#[derive(Debug)]
pub struct RestoreEngine<A: LicenseApi> {
    api: Arc<A>,
    config: Arc<RestoreConfig>,
    shared: Arc<RestoreShared>,
}

impl<A: LicenseApi> Clone for RestoreEngine<A> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            config: self.config.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<A: LicenseApi> RestoreEngine<A> {
    pub fn new(api: A, config: RestoreConfig) -> Self {
        Self::with_shared_api(Arc::new(api), config)
    }

    /// Creates an engine around an api that the caller keeps a handle to.
    pub fn with_shared_api(api: Arc<A>, config: RestoreConfig) -> Self {
        Self {
            api,
            config: Arc::new(config),
            shared: Arc::default(),
        }
    }

    pub fn config(&self) -> &RestoreConfig {
        &self.config
    }

    /// Handle for reading progress and requesting a stop.
    pub fn reporter(&self) -> StatusReporter {
        StatusReporter::new(self.shared.clone())
    }

    /// Starts a restore in a background task and returns immediately.
    ///
    /// Fails with `InvalidInput` for an empty list or a record without a key,
    /// and with `AlreadyInProgress` while another job runs. Neither failure
    /// changes the current snapshot.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, request: RestoreRequest) -> Result<RestoreAck> {
        request.validate()?;
        let total = request.licenses.len();
        {
            let mut job = self.shared.job.lock();
            if job.running {
                return Err(KeyRelayError::AlreadyInProgress);
            }
            *job = RestoreSnapshot {
                phase: RestorePhase::Running,
                running: true,
                total,
                started_at: Some(Utc::now()),
                ..RestoreSnapshot::default()
            };
            // cleared under the lock so a stop aimed at the previous job cannot leak in
            self.shared.stop.store(false, Ordering::Release);
        }
        info!(total, wipe = request.wipe, "restore started");

        let worker = RestoreWorker {
            api: self.api.clone(),
            config: self.config.clone(),
            shared: self.shared.clone(),
        };
        tokio::spawn(worker.run(request));
        Ok(RestoreAck { total })
    }
}

/// Outcome of one item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Succeeded,
    Skipped,
    Failed,
}

struct RestoreWorker<A: LicenseApi> {
    api: Arc<A>,
    config: Arc<RestoreConfig>,
    shared: Arc<RestoreShared>,
}

impl<A: LicenseApi> RestoreWorker<A> {
    async fn run(self, request: RestoreRequest) {
        let mut guard = FinishGuard {
            shared: self.shared.clone(),
            armed: true,
            in_flight: false,
        };
        if request.wipe {
            self.wipe().await;
        }

        for (index, record) in request.licenses.iter().enumerate() {
            if self.shared.stop_requested() {
                info!(processed = index, "restore stopped by user");
                guard.finish(RestorePhase::Cancelled, Some(STOPPED_BY_USER.to_string()));
                return;
            }
            let duration = record.resolved_duration();
            self.shared.update(|job| {
                job.current_key.clone_from(&record.key);
                job.processed += 1;
            });
            guard.in_flight = true;

            let (outcome, item_error) = self.restore_item(record, duration).await;
            self.shared.update(|job| {
                match outcome {
                    ItemOutcome::Succeeded => job.succeeded += 1,
                    ItemOutcome::Skipped => job.skipped += 1,
                    ItemOutcome::Failed => job.failed += 1,
                }
                if let Some(message) = item_error {
                    job.last_item_error = Some(message);
                }
            });
            guard.in_flight = false;

            tokio::time::sleep(self.config.item_delay).await;
            let done = index + 1;
            if self.config.batch_size > 0 && done % self.config.batch_size == 0 {
                debug!(done, "batch pause");
                tokio::time::sleep(self.config.batch_pause).await;
            }
        }

        info!("restore complete");
        guard.finish(RestorePhase::Completed, None);
    }

    /// Best-effort: failures are logged and the restore continues.
    async fn wipe(&self) {
        info!("wiping licenses and users before restore");
        if let Err(err) = self.api.wipe_licenses().await {
            warn!(error = %err, "license wipe failed");
        }
        tokio::time::sleep(self.config.wipe_pause).await;
        if let Err(err) = self.api.wipe_users().await {
            warn!(error = %err, "user wipe failed");
        }
        tokio::time::sleep(self.config.wipe_pause).await;
    }

    /// Calls upstream until the item settles or attempts run out.
    /// Returns the outcome and the message of the last failure, if any.
    async fn restore_item(
        &self,
        record: &LicenseRecord,
        duration: LicenseDuration,
    ) -> (ItemOutcome, Option<String>) {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            let backoff = match self.api.restore_license(record, duration).await {
                Ok(reply) if reply.success => {
                    debug!(key = %record.key, attempt, "restored");
                    return (ItemOutcome::Succeeded, None);
                }
                Ok(reply) => {
                    let message = reply
                        .message
                        .unwrap_or_else(|| "no message in response".to_string());
                    match classify_failure(&message) {
                        FailureClass::Duplicate => {
                            debug!(key = %record.key, %message, "already exists, skipped");
                            return (ItemOutcome::Skipped, None);
                        }
                        FailureClass::Terminal => {
                            warn!(key = %record.key, %message, "restore rejected");
                            return (ItemOutcome::Failed, Some(message));
                        }
                        FailureClass::RateLimited => {
                            warn!(key = %record.key, attempt, %message, "rate limited");
                            last_error = Some(message);
                            self.config.rate_limit_backoff
                        }
                    }
                }
                Err(err) if err.is_transient() => {
                    warn!(key = %record.key, attempt, error = %err, "restore call failed");
                    last_error = Some(err.to_string());
                    self.config.transport_backoff
                }
                Err(err) => {
                    warn!(key = %record.key, error = %err, "restore call failed, not retried");
                    return (ItemOutcome::Failed, Some(err.to_string()));
                }
            };
            if attempt < max_attempts {
                tokio::time::sleep(backoff).await;
            }
        }
        warn!(key = %record.key, max_attempts, "giving up after retries");
        (ItemOutcome::Failed, last_error)
    }
}

/// Finalizes the snapshot when the worker ends.
///
/// If the worker exits without calling `finish` (panic, runtime shutdown) the
/// job is marked `Failed` so `running` never stays true. An item counted as
/// processed but not yet settled is counted as failed.
struct FinishGuard {
    shared: Arc<RestoreShared>,
    armed: bool,
    in_flight: bool,
}

impl FinishGuard {
    fn finish(&mut self, phase: RestorePhase, error: Option<String>) {
        self.armed = false;
        self.shared.update(|job| {
            job.running = false;
            job.phase = phase;
            if phase == RestorePhase::Completed {
                job.current_key = COMPLETE_MARKER.to_string();
            }
            job.error = error;
            job.finished_at = Some(Utc::now());
        });
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if self.armed {
            warn!("restore worker exited unexpectedly");
            if self.in_flight {
                self.shared.update(|job| {
                    job.failed += 1;
                    job.last_item_error = Some(format!("{}: worker exited", job.current_key));
                });
            }
            self.finish(
                RestorePhase::Failed,
                Some("restore worker exited unexpectedly".to_string()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_duplicates() {
        for message in [
            "Key already exists",
            "License ALREADY EXISTS",
            "duplicate key",
            "already used, slow down",
        ] {
            assert_eq!(classify_failure(message), FailureClass::Duplicate, "{message}");
        }
    }

    #[test]
    fn classify_rate_limits() {
        for message in [
            "Rate limited",
            "You're being rate-limited",
            "Slow down",
            "too many requests",
            "request limit reached",
        ] {
            assert_eq!(classify_failure(message), FailureClass::RateLimited, "{message}");
        }
    }

    #[test]
    fn classify_terminal() {
        for message in [
            "Invalid seller key",
            "Mask is too long",
            "",
            "Generated 0 keys",
            "Subscription does not exist",
            "Level doesn't exist",
        ] {
            assert_eq!(classify_failure(message), FailureClass::Terminal, "{message}");
        }
        // "rate" only counts as a whole word
        assert_eq!(classify_failure("Unable to generate"), FailureClass::Terminal);
    }

    #[test]
    fn request_from_json() {
        let request = RestoreRequest::from_json(&json!({
            "licenses": [{"key": "Soryn-A-1d", "level": 2}, {"key": "Soryn-B"}],
            "wipe": true
        }))
        .unwrap();
        assert!(request.wipe);
        assert_eq!(request.licenses.len(), 2);
        assert_eq!(request.licenses[0].level, 2);

        let request = RestoreRequest::from_json(&json!({"licenses": []})).unwrap();
        assert!(!request.wipe);
        assert!(request.validate().is_err());
    }

    #[test]
    fn request_from_json_rejects_bad_shapes() {
        for body in [
            json!({}),
            json!({"licenses": "Soryn-A"}),
            json!([{"key": "Soryn-A"}]),
            json!({"licenses": [{"key": "Soryn-A"}, {"status": "Used"}]}),
        ] {
            let err = RestoreRequest::from_json(&body).unwrap_err();
            assert!(matches!(err, KeyRelayError::InvalidInput { .. }), "{body}");
        }
    }

    #[test]
    fn validate_rejects_blank_key() {
        let request =
            RestoreRequest::new(vec![LicenseRecord::new("Soryn-A"), LicenseRecord::new(" ")]);
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("license 1"));
    }

    #[test]
    fn config_defaults() {
        let config = RestoreConfig::default();
        assert_eq!(config.item_delay, Duration::from_millis(1500));
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.batch_pause, Duration::from_secs(5));
        assert_eq!(config.rate_limit_backoff, Duration::from_secs(10));
        assert_eq!(config.transport_backoff, Duration::from_secs(5));
        assert_eq!(config.max_attempts, 3);
        let fast = RestoreConfig::no_delays();
        assert_eq!(fast.item_delay, Duration::ZERO);
        assert_eq!(fast.max_attempts, 3);
    }
}

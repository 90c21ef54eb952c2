//! Scripted in-memory [`LicenseApi`] for restore tests.
//!
//! Each key has a queue of replies; once the queue is empty every call for
//! that key succeeds. Every call is recorded with the (tokio) time it was made,
//! so tests running on a paused clock can check backoff and pacing.

use std::{collections::HashMap, collections::VecDeque, time::Duration};

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{Result, prelude::*};

pub const OP_RESTORE: &str = "restore";
pub const OP_WIPE_LICENSES: &str = "wipe_licenses";
pub const OP_WIPE_USERS: &str = "wipe_users";

/// Scripted reply to one `restore_license` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    Success,
    /// `success: false` with this message
    Failure(String),
    /// Upstream returned a body that is not json
    Garbage,
    /// The call fails a client-side check before reaching upstream
    Invalid,
    /// The call panics
    Panic,
}

impl MockReply {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }
}

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub operation: &'static str,
    pub key: Option<String>,
    pub duration: Option<LicenseDuration>,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<String, VecDeque<MockReply>>,
    calls: Vec<MockCall>,
    fail_wipes: bool,
}

#[derive(Debug, Default)]
pub struct MockLicenseApi {
    state: Mutex<MockState>,
    call_delay: Duration,
}

impl MockLicenseApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call waits this long before replying.
    #[must_use]
    pub fn with_call_delay(mut self, call_delay: Duration) -> Self {
        self.call_delay = call_delay;
        self
    }

    /// Queues replies for `key`, after any already queued.
    #[must_use]
    pub fn script(self, key: &str, replies: impl IntoIterator<Item = MockReply>) -> Self {
        self.state
            .lock()
            .scripts
            .entry(key.to_string())
            .or_default()
            .extend(replies);
        self
    }

    /// Wipe calls return an upstream rejection.
    #[must_use]
    pub fn fail_wipes(self) -> Self {
        self.state.lock().fail_wipes = true;
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Restore calls made for `key`, in order
    pub fn calls_for(&self, key: &str) -> Vec<MockCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.key.as_deref() == Some(key))
            .cloned()
            .collect()
    }

    /// Keys of restore calls, in call order
    pub fn restored_keys(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.operation == OP_RESTORE)
            .filter_map(|call| call.key.clone())
            .collect()
    }

    fn record(&self, operation: &'static str, key: Option<String>, duration: Option<LicenseDuration>) {
        self.state.lock().calls.push(MockCall {
            operation,
            key,
            duration,
            at: Instant::now(),
        });
    }

    async fn wipe(&self, operation: &'static str) -> Result<()> {
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
        self.record(operation, None, None);
        if self.state.lock().fail_wipes {
            return Err(KeyRelayError::UpstreamRejection {
                operation: operation.to_string(),
                message: "wipe refused".to_string(),
            });
        }
        Ok(())
    }
}

impl LicenseApi for MockLicenseApi {
    async fn restore_license(
        &self,
        record: &LicenseRecord,
        duration: LicenseDuration,
    ) -> Result<UpstreamResult> {
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
        self.record(OP_RESTORE, Some(record.key.clone()), Some(duration));
        let reply = self
            .state
            .lock()
            .scripts
            .get_mut(&record.key)
            .and_then(VecDeque::pop_front)
            .unwrap_or(MockReply::Success);
        match reply {
            MockReply::Success => Ok(UpstreamResult {
                success: true,
                message: Some("License created".to_string()),
                payload: serde_json::json!({"success": true, "key": record.key}),
            }),
            MockReply::Failure(message) => Ok(UpstreamResult {
                success: false,
                message: Some(message.clone()),
                payload: serde_json::json!({"success": false, "message": message}),
            }),
            MockReply::Garbage => {
                let body = "<html>502 Bad Gateway</html>";
                let source = serde_json::from_str::<serde_json::Value>(body)
                    .err()
                    .unwrap_or_else(|| serde_json::Error::io(std::io::Error::other(body)));
                Err(KeyRelayError::Decode {
                    operation: OP_RESTORE.to_string(),
                    snippet: body.to_string(),
                    source,
                })
            }
            MockReply::Invalid => Err(KeyRelayError::Validation {
                message: "seller key not set".to_string(),
            }),
            MockReply::Panic => panic!("scripted panic for {}", record.key),
        }
    }

    async fn wipe_licenses(&self) -> Result<()> {
        self.wipe(OP_WIPE_LICENSES).await
    }

    async fn wipe_users(&self) -> Result<()> {
        self.wipe(OP_WIPE_USERS).await
    }
}

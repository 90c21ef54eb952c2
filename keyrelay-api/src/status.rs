//! # Restore status
//!
//! Shared progress state of the restore job, and the [`StatusReporter`] handle
//! that reads it and requests cancellation.
//!
//! The worker task is the only writer of the progress fields. Readers get a
//! copy; fields are consistent with each other only at item boundaries.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

/// Terminal error recorded when a job is cancelled
pub const STOPPED_BY_USER: &str = "Stopped by user";

/// `current_key` value after a job completes normally
pub const COMPLETE_MARKER: &str = "Complete";

/// Lifecycle of the restore job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RestorePhase {
    /// No restore has run yet
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    /// The worker stopped unexpectedly
    Failed,
}

/// Point-in-time copy of the restore job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSnapshot {
    pub phase: RestorePhase,
    pub running: bool,
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub current_key: String,
    /// Why the job ended early
    pub error: Option<String>,
    /// Most recent per-item failure
    pub last_item_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RestoreSnapshot {
    /// Items whose outcome has been recorded
    pub fn settled(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }

    /// true once a job has ended, by any path
    pub fn is_finished(&self) -> bool {
        matches!(
            self.phase,
            RestorePhase::Completed | RestorePhase::Cancelled | RestorePhase::Failed
        )
    }
}

impl fmt::Display for RestoreSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} ok={} skipped={} failed={}",
            self.phase, self.processed, self.total, self.succeeded, self.skipped, self.failed
        )?;
        if let Some(error) = &self.error {
            write!(f, " error={error}")?;
        }
        Ok(())
    }
}

/// Acknowledgement of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StopAck {
    pub stopped: bool,
}

/// State shared by the engine, its worker, and every reporter.
#[derive(Debug, Default)]
pub(crate) struct RestoreShared {
    pub(crate) job: Mutex<RestoreSnapshot>,
    pub(crate) stop: AtomicBool,
}

impl RestoreShared {
    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub(crate) fn update(&self, apply: impl FnOnce(&mut RestoreSnapshot)) {
        let mut job = self.job.lock();
        apply(&mut job);
    }
}

/// Read access to restore progress, plus cancellation.
///
/// Obtained via [`RestoreEngine::reporter`](crate::restore::RestoreEngine::reporter).
/// Cheap to clone; all clones observe the same job.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    shared: Arc<RestoreShared>,
}

impl StatusReporter {
    pub(crate) fn new(shared: Arc<RestoreShared>) -> Self {
        Self { shared }
    }

    /// Returns a copy of the current job state.
    pub fn snapshot(&self) -> RestoreSnapshot {
        self.shared.job.lock().clone()
    }

    /// Asks the running job to stop before its next item.
    ///
    /// Idempotent, and succeeds even when no job is running.
    pub fn request_stop(&self) -> StopAck {
        if !self.shared.stop.swap(true, Ordering::AcqRel) {
            info!("restore stop requested");
        }
        StopAck { stopped: true }
    }

    /// true if a stop has been requested since the current job started
    pub fn stop_requested(&self) -> bool {
        self.shared.stop_requested()
    }
}

//! Work item lifecycle: creation, deadlines, and status transitions.
//!
//! ```text
//! Pending ──get (live)──▶ Dispatched ──submit (live)──▶ Complete
//!    │                        │
//!    └──── any touch after the deadline ────▶ Timeout
//! ```
//!
//! There is no background sweep. A deadline is only checked when the item
//! is next fetched or submitted, and terminal items never move again.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{TimeStats, Work, WorkId, WorkResult, WorkStatus};

/// Error text recorded on a work item whose deadline passed.
pub const TIMEOUT_ERROR: &str = "Timeout";

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of "now" for deadline checks.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Useful for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        *now = now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

/// Serialize `payload` into a new pending work item.
///
/// Timestamps stay empty until the item is added to a server.
pub fn create_work<T: Serialize + ?Sized>(payload: &T, timeout: Duration) -> Result<Work> {
    let payload = serde_json::to_string(payload)?;
    Ok(Work {
        id: WorkId::new(),
        payload,
        result: WorkResult::pending(),
        time: TimeStats {
            timeout,
            ..TimeStats::default()
        },
    })
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

impl Work {
    /// `added + timeout`, or `None` if that overflows (the item never expires).
    ///
    /// An item that was never added counts as added at the Unix epoch.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let added = self.time.added.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let timeout = TimeDelta::from_std(self.time.timeout).ok()?;
        added.checked_add_signed(timeout)
    }

    /// True while `added + timeout > now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.deadline().is_none_or(|deadline| deadline > now)
    }

    pub(crate) fn mark_added(&mut self, now: DateTime<Utc>) {
        self.time.added = Some(now);
    }

    /// Hand the item to a worker, or time it out if it is already stale.
    ///
    /// A stale item is moved to `Timeout` and returned inside the error.
    pub(crate) fn dispatch(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.is_live_at(now) {
            return Err(self.expire());
        }
        self.transition(WorkStatus::Dispatched)?;
        self.time.received = Some(now);
        Ok(())
    }

    /// Record the worker's result. Stamps `completed` either way.
    ///
    /// Before the deadline the status becomes `Complete` and `error` is kept
    /// as the worker's application-level error. After it, the status and
    /// error are forced to `Timeout` and the item comes back in the error.
    pub(crate) fn finish(
        &mut self,
        now: DateTime<Utc>,
        payload: String,
        error: Option<String>,
    ) -> Result<()> {
        let from = self.status();
        if from.is_terminal() {
            return Err(Error::InvalidTransition {
                from,
                to: WorkStatus::Complete,
            });
        }

        self.time.completed = Some(now);
        self.result.payload = payload;
        self.result.work_id = Some(WorkId::parse(&self.id.hex())?);

        if !self.is_live_at(now) {
            return Err(self.expire());
        }
        self.transition(WorkStatus::Complete)?;
        self.result.error = error;
        Ok(())
    }

    /// Move to `Timeout` (unless already terminal) and build the matching error.
    pub(crate) fn expire(&mut self) -> Error {
        self.mark_timed_out();
        Error::Timeout(Box::new(self.clone()))
    }

    pub(crate) fn mark_timed_out(&mut self) {
        if !self.status().is_terminal() {
            self.result.status = WorkStatus::Timeout;
            self.result.error = Some(TIMEOUT_ERROR.to_string());
        }
    }

    fn transition(&mut self, to: WorkStatus) -> Result<()> {
        let from = self.status();
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { from, to });
        }
        self.result.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn added_at(now: DateTime<Utc>, timeout: Duration) -> Work {
        let mut work = create_work(&json!({"n": 1}), timeout).unwrap();
        work.mark_added(now);
        work
    }

    #[test]
    fn deadline_is_strict() {
        let now = Utc::now();
        let work = added_at(now, Duration::from_secs(10));
        assert!(work.is_live_at(now + TimeDelta::seconds(9)));
        assert!(!work.is_live_at(now + TimeDelta::seconds(10)));
    }

    #[test]
    fn zero_timeout_is_never_live() {
        let now = Utc::now();
        let work = added_at(now, Duration::ZERO);
        assert!(!work.is_live_at(now));
    }

    #[test]
    fn overflowing_deadline_never_expires() {
        let now = Utc::now();
        let work = added_at(now, Duration::MAX);
        assert!(work.deadline().is_none());
        assert!(work.is_live_at(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn stale_dispatch_times_out() {
        let now = Utc::now();
        let mut work = added_at(now, Duration::from_secs(1));
        let err = work.dispatch(now + TimeDelta::seconds(5)).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(work.status(), WorkStatus::Timeout);
        assert_eq!(work.result.error.as_deref(), Some(TIMEOUT_ERROR));
        assert!(work.time.received.is_none());
    }

    #[test]
    fn finished_work_cannot_finish_again() {
        let now = Utc::now();
        let mut work = added_at(now, Duration::from_secs(60));
        work.dispatch(now).unwrap();
        work.finish(now, "{}".into(), None).unwrap();
        let err = work.finish(now, "{}".into(), None).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }
}

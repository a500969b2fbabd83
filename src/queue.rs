//! FIFO work queue plus the ledger of items handed out to workers.
//!
//! Both live behind one lock owned by the queue. No other lock is ever
//! taken while it is held, and events are fired by the caller after it is
//! released.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Work, WorkId};

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Work>,
    dispatched: HashMap<WorkId, Work>,
}

impl QueueState {
    /// Remove ledger entries that are past their deadline, oldest first.
    fn expire_dispatched(&mut self, now: DateTime<Utc>) -> Vec<Work> {
        let stale: Vec<WorkId> = self
            .dispatched
            .values()
            .filter(|work| !work.is_live_at(now))
            .map(|work| work.id)
            .collect();

        let mut expired: Vec<Work> = stale
            .iter()
            .filter_map(|id| self.dispatched.remove(id))
            .map(|mut work| {
                work.mark_timed_out();
                work
            })
            .collect();
        expired.sort_by_key(|work| work.time.added);
        expired
    }
}

/// Outcome of one [`WorkQueue::pop_for_dispatch`] call.
#[derive(Debug)]
pub struct Dispatch {
    pub next: Option<Result<Work>>,
    pub expired: Vec<Work>,
}

/// Volatile, process-local queue. Insertion order is dispatch order.
#[derive(Debug, Default)]
pub struct WorkQueue {
    inner: Mutex<QueueState>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append to the tail.
    pub fn push(&self, work: Work) {
        self.state().pending.push_back(work);
    }

    /// Pop the head and dispatch it as of `now`.
    ///
    /// `next` is `None` when the queue is empty. A stale head is still
    /// consumed: it comes back as `Err(Timeout)` and is not ledgered or
    /// re-queued. A live head is recorded as dispatched so it can be
    /// completed by id later.
    ///
    /// Dispatched items whose deadline has passed are dropped from the
    /// ledger on the same call and returned in `expired`, already marked
    /// `Timeout`.
    pub fn pop_for_dispatch(&self, now: DateTime<Utc>) -> Dispatch {
        let mut state = self.state();
        let expired = state.expire_dispatched(now);
        let next = state.pending.pop_front().map(|mut work| -> Result<Work> {
            work.dispatch(now)?;
            state.dispatched.insert(work.id, work.clone());
            Ok(work)
        });
        Dispatch { next, expired }
    }

    /// Remove a dispatched item from the ledger.
    pub fn take_dispatched(&self, id: &WorkId) -> Option<Work> {
        self.state().dispatched.remove(id)
    }

    /// Items awaiting dispatch.
    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().pending.is_empty()
    }

    /// Items handed out and not yet completed.
    pub fn dispatched_len(&self) -> usize {
        self.state().dispatched.len()
    }
}

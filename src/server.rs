//! The work server. The public API for handing work to workers.
//!
//! The server owns the event bus, the worker registry, and the queue, and
//! is the only place where they meet. The registry and the queue each
//! guard their own state with one lock; no operation holds both.
//!
//! Cloning a server is cheap and every clone shares the same state, so a
//! transport can hand one clone to each connection.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::crypto::Transformer;
use crate::error::{Error, Result};
use crate::event::{Event, EventBus, EventHandler, HandlerParams, Hook};
use crate::lifecycle::{self, Clock, SystemClock};
use crate::model::{SessionToken, Work, WorkId, WorkStatus, Worker, WorkerId};
use crate::queue::WorkQueue;
use crate::registry::WorkerRegistry;
use crate::telemetry::metrics;
use crate::telemetry::work::{record_state_transition, start_work_span};

pub struct WorkServer {
    events: Arc<EventBus>,
    workers: Arc<WorkerRegistry>,
    queue: Arc<WorkQueue>,
    clock: Arc<dyn Clock>,
}

impl Clone for WorkServer {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
            workers: Arc::clone(&self.workers),
            queue: Arc::clone(&self.queue),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl std::fmt::Debug for WorkServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkServer")
            .field("events", &self.events)
            .field("workers", &self.workers.len())
            .field("queued", &self.queue.len())
            .field("clock", &self.clock)
            .finish()
    }
}

impl WorkServer {
    /// Create a server keyed by a 32-byte shared secret.
    pub fn new(secret: &[u8]) -> Result<Self> {
        Self::with_clock(secret, Arc::new(SystemClock))
    }

    /// Create a server that reads time from `clock`.
    pub fn with_clock(secret: &[u8], clock: Arc<dyn Clock>) -> Result<Self> {
        let transformer = Transformer::new(secret)?;
        let events = Arc::new(EventBus::new());
        Ok(Self {
            workers: Arc::new(WorkerRegistry::new(transformer, Arc::clone(&events))),
            events,
            queue: Arc::new(WorkQueue::new()),
            clock,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.secret_bytes())
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Register the handler for `hook`. Fails with `HandlerExists` if one is
    /// already registered; the existing handler is kept.
    pub fn new_handler(&self, hook: Hook, handler: impl EventHandler) -> Result<()> {
        self.events.add_handler(hook, handler)
    }

    /// Replace the parameters passed to every handler.
    pub fn add_params(&self, params: HandlerParams) -> &Self {
        self.events.set_params(params);
        self
    }

    /// Fire an event by hand, the same way the server does.
    pub fn event(&self, hook: Hook, event: Event) {
        self.events.emit(hook, event);
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // -----------------------------------------------------------------------
    // Workers
    // -----------------------------------------------------------------------

    pub fn register(&self) -> (WorkerId, String) {
        self.workers.register()
    }

    pub fn verify(&self, worker_id: &str, response: &[u8]) -> Result<SessionToken> {
        self.workers.verify(worker_id, response)
    }

    pub fn worker(&self, id: WorkerId) -> Option<Worker> {
        self.workers.worker(id)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    // -----------------------------------------------------------------------
    // Work
    // -----------------------------------------------------------------------

    /// Stamp `added`, announce, and append to the queue.
    pub fn add(&self, mut work: Work) -> WorkId {
        work.mark_added(self.clock.now());
        let id = work.id;

        info!(work_id = %id, timeout_secs = work.time.timeout.as_secs(), "work added");
        metrics::work_added().add(1, &[]);
        self.events.emit(Hook::AddWork, Event::work(&work));
        self.queue.push(work);
        id
    }

    /// Hand the head of the queue to an authenticated worker.
    ///
    /// `Ok(None)` when there is nothing to do. A head that is already past
    /// its deadline is still removed and comes back inside `Error::Timeout`.
    /// Dispatched items that were never completed in time are dropped here
    /// too, each with a `work_timeout` event. Authentication failures leave
    /// the queue untouched.
    pub fn get(&self, worker_id: &str, session_token: &str) -> Result<Option<Work>> {
        if let Err(e) = self.workers.authenticate(worker_id, session_token) {
            let reason = match &e {
                Error::IdentityParse(_) => "StrconvError",
                _ => "AuthFailed",
            };
            warn!(worker_id, reason, "work request rejected");
            metrics::worker_auth_failures().add(1, &[KeyValue::new("operation", "get")]);
            self.events.emit(Hook::GetWorkError, Event::error(reason));
            return Err(e);
        }

        let dispatch = self.queue.pop_for_dispatch(self.clock.now());
        for work in &dispatch.expired {
            let span = start_work_span("get", &work.id);
            record_state_transition(&span, WorkStatus::Dispatched, WorkStatus::Timeout);
            warn!(work_id = %work.id, "dispatched work was never completed");
            metrics::work_timeouts().add(1, &[KeyValue::new("stage", "in_flight")]);
            self.events.emit(Hook::WorkTimeout, Event::work(work));
        }

        match dispatch.next {
            None => {
                debug!(worker_id, "no work available");
                self.events.emit(Hook::GetWorkEmpty, Event::error("NoWork"));
                Ok(None)
            }
            Some(Ok(work)) => {
                let span = start_work_span("get", &work.id);
                record_state_transition(&span, WorkStatus::Pending, WorkStatus::Dispatched);
                info!(work_id = %work.id, worker_id, "work dispatched");
                metrics::work_dispatched().add(1, &[]);
                self.events.emit(Hook::GetWork, Event::work(&work));
                Ok(Some(work))
            }
            Some(Err(Error::Timeout(work))) => {
                let span = start_work_span("get", &work.id);
                record_state_transition(&span, WorkStatus::Pending, WorkStatus::Timeout);
                warn!(work_id = %work.id, worker_id, "work timed out before dispatch");
                metrics::work_timeouts().add(1, &[KeyValue::new("stage", "get")]);
                self.events.emit(Hook::WorkTimeout, Event::work(&work));
                Err(Error::Timeout(work))
            }
            Some(Err(e)) => {
                warn!(worker_id, error = %e, "queued work could not be dispatched");
                self.events.emit(Hook::GetWorkError, Event::error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Record a worker's result on `work`.
    ///
    /// Before the deadline this completes the item with `error` as the
    /// worker's own error text. After it, the item is marked `Timeout` and
    /// `Error::Timeout` is returned. Either way the outcome is final.
    pub fn submit(&self, work: &mut Work, result: String, error: Option<String>) -> Result<()> {
        let from = work.status();
        let span = start_work_span("submit", &work.id);

        match work.finish(self.clock.now(), result, error) {
            Ok(()) => {
                record_state_transition(&span, from, WorkStatus::Complete);
                info!(work_id = %work.id, "work complete");
                metrics::work_completed().add(1, &[]);
                self.events.emit(Hook::WorkComplete, Event::work(work));
                Ok(())
            }
            Err(Error::Timeout(timed_out)) => {
                record_state_transition(&span, from, WorkStatus::Timeout);
                warn!(work_id = %work.id, "work submitted after its deadline");
                metrics::work_timeouts().add(1, &[KeyValue::new("stage", "submit")]);
                self.events.emit(Hook::WorkTimeout, Event::work(work));
                Err(Error::Timeout(timed_out))
            }
            Err(e) => {
                warn!(work_id = %work.id, error = %e, "work submission rejected");
                Err(e)
            }
        }
    }

    /// Items waiting for a worker.
    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    /// Items handed to a worker and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.queue.dispatched_len()
    }

    // -----------------------------------------------------------------------
    // String-level operations for transports
    // -----------------------------------------------------------------------

    /// Returns `(worker_id, challenge)`.
    pub fn register_worker(&self) -> (String, String) {
        let (id, challenge) = self.register();
        (id.to_string(), challenge)
    }

    /// Returns the session token.
    pub fn verify_worker(&self, worker_id: &str, encrypted_response: &[u8]) -> Result<String> {
        self.verify(worker_id, encrypted_response)
            .map(|token| token.as_str().to_string())
    }

    /// Create and enqueue a work item. Returns its hex id.
    pub fn submit_work<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        timeout_secs: u64,
    ) -> Result<String> {
        let work = lifecycle::create_work(payload, Duration::from_secs(timeout_secs))?;
        Ok(self.add(work).hex())
    }

    pub fn fetch_work(&self, worker_id: &str, session_token: &str) -> Result<Option<Work>> {
        self.get(worker_id, session_token)
    }

    /// Complete a dispatched item by id. An empty `error_text` means no error.
    ///
    /// Returns the item in its final state.
    pub fn complete_work<T: Serialize + ?Sized>(
        &self,
        work_id: &str,
        result: &T,
        error_text: &str,
    ) -> Result<Work> {
        let id = WorkId::parse(work_id)?;
        let result = serde_json::to_string(result)?;
        let mut work = self
            .queue
            .take_dispatched(&id)
            .ok_or_else(|| Error::NotFound(work_id.to_string()))?;

        let error = (!error_text.is_empty()).then(|| error_text.to_string());
        self.submit(&mut work, result, error)?;
        Ok(work)
    }
}

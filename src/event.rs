//! Synchronous event hooks fired on every state transition.
//!
//! At most one handler per hook. Handlers run on the caller's thread while
//! the triggering operation waits, so they must stay short and must not
//! block. A panicking handler is logged and swallowed; it never reaches the
//! operation that fired the event.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{Work, Worker};

/// Shared context handed to every handler alongside the event.
pub type HandlerParams = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Event ids the server fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    AddWork,
    AddHandlerError,
    GetWork,
    GetWorkEmpty,
    GetWorkError,
    WorkComplete,
    WorkTimeout,
    WorkerRegister,
    WorkerVerify,
    WorkerVerifyError,
}

impl Hook {
    pub const ALL: [Hook; 10] = [
        Hook::AddWork,
        Hook::AddHandlerError,
        Hook::GetWork,
        Hook::GetWorkEmpty,
        Hook::GetWorkError,
        Hook::WorkComplete,
        Hook::WorkTimeout,
        Hook::WorkerRegister,
        Hook::WorkerVerify,
        Hook::WorkerVerifyError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Hook::AddWork => "add_work",
            Hook::AddHandlerError => "add_handler_error",
            Hook::GetWork => "get_work",
            Hook::GetWorkEmpty => "get_work_empty",
            Hook::GetWorkError => "get_work_error",
            Hook::WorkComplete => "work_complete",
            Hook::WorkTimeout => "work_timeout",
            Hook::WorkerRegister => "worker_register",
            Hook::WorkerVerify => "worker_verify",
            Hook::WorkerVerifyError => "worker_verify_error",
        }
    }
}

impl std::fmt::Display for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Hook {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Hook::ALL
            .into_iter()
            .find(|hook| hook.as_str() == s)
            .ok_or_else(|| Error::Other(format!("unknown event id: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A notification. Never stored by the server.
#[derive(Debug, Clone)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    Work(Box<Work>),
    Worker(Box<Worker>),
    Error(String),
}

impl Event {
    pub fn work(work: &Work) -> Self {
        Self::now(EventPayload::Work(Box::new(work.clone())))
    }

    pub fn worker(worker: &Worker) -> Self {
        Self::now(EventPayload::Worker(Box::new(worker.clone())))
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::now(EventPayload::Error(msg.into()))
    }

    fn now(payload: EventPayload) -> Self {
        Self {
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn as_work(&self) -> Option<&Work> {
        match &self.payload {
            EventPayload::Work(work) => Some(work),
            _ => None,
        }
    }

    pub fn as_worker(&self) -> Option<&Worker> {
        match &self.payload {
            EventPayload::Worker(worker) => Some(worker),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Error(msg) => Some(msg),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Observer invoked for one hook.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, event: &Event, params: &HandlerParams);
}

impl<F> EventHandler for F
where
    F: Fn(&Event, &HandlerParams) + Send + Sync + 'static,
{
    fn handle(&self, event: &Event, params: &HandlerParams) {
        self(event, params)
    }
}

/// Hook table plus the shared parameter bag.
///
/// Locks are only held to look up or swap entries, never while a handler
/// runs, so a handler may call back into the bus.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<Hook, Arc<dyn EventHandler>>>,
    params: RwLock<Arc<HandlerParams>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `hook`.
    ///
    /// A second registration for the same hook is rejected with
    /// `HandlerExists` (and reported on `add_handler_error`); the first
    /// handler stays in place.
    pub fn add_handler(&self, hook: Hook, handler: impl EventHandler) -> Result<()> {
        {
            let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
            if !handlers.contains_key(&hook) {
                handlers.insert(hook, Arc::new(handler));
                debug!(hook = %hook, "event handler registered");
                return Ok(());
            }
        }

        warn!(hook = %hook, "event handler already registered");
        self.emit(Hook::AddHandlerError, Event::error("HandlerExists"));
        Err(Error::HandlerExists(hook))
    }

    /// Replace the parameter bag passed to every handler.
    pub fn set_params(&self, params: HandlerParams) {
        *self.params.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(params);
    }

    pub fn params(&self) -> Arc<HandlerParams> {
        Arc::clone(&self.params.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn has_handler(&self, hook: Hook) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&hook)
    }

    /// Fire `event` on `hook`. No-op without a handler.
    pub fn emit(&self, hook: Hook, event: Event) {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&hook)
            .cloned();
        let Some(handler) = handler else {
            return;
        };
        let params = self.params();

        if catch_unwind(AssertUnwindSafe(|| handler.handle(&event, &params))).is_err() {
            warn!(hook = %hook, "event handler panicked");
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hooks: Vec<Hook> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        f.debug_struct("EventBus").field("hooks", &hooks).finish()
    }
}

//! Worker registry: challenge issuance, verification, and session checks.
//!
//! The registry owns every `Worker` record and the identity counter behind
//! a single lock. Events are fired after the lock is released, so a handler
//! may safely call back into the registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use opentelemetry::KeyValue;
use tracing::{info, warn};
use uuid::Uuid;

use crate::crypto::{self, Transformer};
use crate::error::{Error, Result};
use crate::event::{Event, EventBus, Hook};
use crate::model::{SessionToken, Worker, WorkerId};
use crate::telemetry::metrics;

#[derive(Debug, Default)]
struct RegistryState {
    members: HashMap<WorkerId, Worker>,
    /// Last identity handed out. The next worker gets `count + 1`.
    count: u64,
}

/// Tracks worker identities and grants session tokens.
#[derive(Debug)]
pub struct WorkerRegistry {
    transformer: Transformer,
    events: Arc<EventBus>,
    inner: Mutex<RegistryState>,
}

impl WorkerRegistry {
    pub fn new(transformer: Transformer, events: Arc<EventBus>) -> Self {
        Self {
            transformer,
            events,
            inner: Mutex::new(RegistryState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate the next identity and issue a fresh challenge.
    ///
    /// Open to anyone; this is how an anonymous worker enters the protocol.
    pub fn register(&self) -> (WorkerId, String) {
        let challenge = Uuid::new_v4().to_string();
        let worker = {
            let mut state = self.state();
            state.count += 1;
            let worker = Worker::new(WorkerId(state.count), challenge.clone());
            state.members.insert(worker.id, worker.clone());
            worker
        };

        info!(worker_id = %worker.id, "worker registered");
        metrics::worker_registered().add(1, &[]);
        self.events.emit(Hook::WorkerRegister, Event::worker(&worker));
        (worker.id, challenge)
    }

    /// Check an encrypted echo of the challenge and grant a session token.
    ///
    /// A failed attempt leaves the worker unverified and free to try again.
    /// Verifying an already verified worker issues a new token; the old one
    /// stops working.
    pub fn verify(&self, worker_id: &str, response: &[u8]) -> Result<SessionToken> {
        match self.try_verify(worker_id, response) {
            Ok(worker) => {
                info!(worker_id = %worker.id, "worker verified");
                self.events.emit(Hook::WorkerVerify, Event::worker(&worker));
                worker
                    .session_token()
                    .cloned()
                    .ok_or_else(|| Error::Other("verified worker has no session".to_string()))
            }
            Err(e) => {
                let reason = match &e {
                    Error::IdentityParse(_) => "StrconvError",
                    Error::DecryptionFailure => "DecryptionError",
                    Error::ChallengeMismatch => "KeyMismatch",
                    _ => "AuthFailed",
                };
                warn!(worker_id, reason, "worker verification failed");
                metrics::worker_auth_failures().add(1, &[KeyValue::new("operation", "verify")]);
                self.events.emit(Hook::WorkerVerifyError, Event::error(reason));
                Err(e)
            }
        }
    }

    fn try_verify(&self, worker_id: &str, response: &[u8]) -> Result<Worker> {
        let id = WorkerId::parse(worker_id)?;
        let plaintext = self.transformer.decrypt(response)?;

        let mut state = self.state();
        let worker = state
            .members
            .get_mut(&id)
            .ok_or(Error::AuthenticationFailure)?;
        worker.verification.response = Some(String::from_utf8_lossy(&plaintext).into_owned());
        if worker.verification.challenge.as_bytes() != plaintext.as_slice() {
            return Err(Error::ChallengeMismatch);
        }

        worker.grant_session(SessionToken::from(crypto::random_token()));
        Ok(worker.clone())
    }

    /// Confirm that `token` is the current session token of `worker_id`.
    ///
    /// Unknown and unverified workers never authenticate. Nothing is mutated.
    pub fn authenticate(&self, worker_id: &str, token: &str) -> Result<WorkerId> {
        let id = WorkerId::parse(worker_id)?;
        let state = self.state();
        match state.members.get(&id) {
            Some(worker) if worker.accepts(token) => Ok(id),
            _ => Err(Error::AuthenticationFailure),
        }
    }

    /// Snapshot of a worker record.
    pub fn worker(&self, id: WorkerId) -> Option<Worker> {
        self.state().members.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().members.is_empty()
    }
}

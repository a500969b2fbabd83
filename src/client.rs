//! Worker side of the protocol.
//!
//! A worker holds the same shared secret as the server. It encrypts the
//! challenge it was issued at registration, trades that for a session
//! token, and then processes and completes the work it fetches. Moving the
//! bytes between worker and server is up to the transport.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::crypto::Transformer;
use crate::error::Result;
use crate::lifecycle::{Clock, SystemClock};
use crate::model::{SessionToken, Work, WorkerId};

#[derive(Debug)]
pub struct WorkerClient {
    id: WorkerId,
    challenge: String,
    response: Vec<u8>,
    session: Option<SessionToken>,
    clock: Arc<dyn Clock>,
}

impl WorkerClient {
    /// Prepare the verification response for `challenge`.
    ///
    /// Fails with `InvalidKeySize` for a bad secret and `IdentityParse` for a
    /// malformed id.
    pub fn new(secret: &[u8], worker_id: &str, challenge: &str) -> Result<Self> {
        Self::with_clock(secret, worker_id, challenge, Arc::new(SystemClock))
    }

    pub fn with_clock(
        secret: &[u8],
        worker_id: &str,
        challenge: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let transformer = Transformer::new(secret)?;
        let id = WorkerId::parse(worker_id)?;
        let response = transformer.encrypt(challenge.as_bytes())?;
        Ok(Self {
            id,
            challenge: challenge.to_string(),
            response,
            session: None,
            clock,
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// Encrypted challenge to send to the server's verify operation.
    pub fn client_response(&self) -> &[u8] {
        &self.response
    }

    pub fn set_session_token(&mut self, token: impl Into<SessionToken>) -> &mut Self {
        self.session = Some(token.into());
        self
    }

    pub fn session_token(&self) -> Option<&SessionToken> {
        self.session.as_ref()
    }

    /// Decode the payload of fetched work.
    ///
    /// Fails with `Timeout` if the deadline has already passed, so no effort
    /// is spent on work the server will reject. Stamps `received`.
    pub fn process<T: DeserializeOwned>(&self, work: &mut Work) -> Result<T> {
        let now = self.clock.now();
        if !work.is_live_at(now) {
            return Err(work.expire());
        }
        let params = work.payload_as()?;
        work.time.received = Some(now);
        debug!(work_id = %work.id, worker_id = %self.id, "work received");
        Ok(params)
    }

    /// Attach a result locally, using the same deadline rule as the server.
    pub fn complete<T: Serialize + ?Sized>(
        &self,
        work: &mut Work,
        result: &T,
        error: Option<String>,
    ) -> Result<()> {
        let result = serde_json::to_string(result)?;
        work.finish(self.clock.now(), result, error)
    }
}

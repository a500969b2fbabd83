//! Core data model.
//!
//! A work item is an opaque payload plus the timestamps and result slot the
//! lifecycle needs. A worker is an anonymous process that proved it holds the
//! shared secret and was granted a session token.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A unit of dispatchable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Work {
    /// Unique identifier. Serialized as its hex form.
    pub id: WorkId,

    /// Serialized JSON payload. The server never interprets it.
    pub payload: String,

    /// Result slot. Starts out `Pending`.
    pub result: WorkResult,

    pub time: TimeStats,
}

impl Work {
    /// Current lifecycle status (shorthand for `result.status`).
    pub fn status(&self) -> WorkStatus {
        self.result.status
    }

    /// Decode the payload into a concrete type.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.payload)?)
    }

    /// Encode the whole item for a transport.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Work identifier. The hex string is the external form; parsing it back
/// always yields the same identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkId(Uuid);

impl WorkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse the hex form produced by [`WorkId::hex`].
    pub fn parse(hex: &str) -> Result<Self> {
        Uuid::try_parse(hex)
            .map(Self)
            .map_err(|_| Error::InvalidWorkId(hex.to_string()))
    }

    /// 32 lowercase hex digits, no separators.
    pub fn hex(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl TryFrom<String> for WorkId {
    type Error = Error;

    fn try_from(hex: String) -> Result<Self> {
        Self::parse(&hex)
    }
}

impl From<WorkId> for String {
    fn from(id: WorkId) -> Self {
        id.hex()
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkStatus {
    /// Created or queued, not yet handed to a worker.
    #[default]
    Pending,
    /// Handed to a worker before its deadline.
    Dispatched,
    /// Result submitted before the deadline. Terminal.
    Complete,
    /// Touched after the deadline. Terminal.
    Timeout,
}

impl WorkStatus {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: WorkStatus) -> bool {
        use WorkStatus::*;
        matches!(
            (self, to),
            (Pending, Dispatched)
                | (Pending, Complete)   // submitted without going through the queue
                | (Pending, Timeout)
                | (Dispatched, Complete)
                | (Dispatched, Timeout)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkStatus::Complete | WorkStatus::Timeout)
    }
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkStatus::Pending => "Pending",
            WorkStatus::Dispatched => "Dispatched",
            WorkStatus::Complete => "Complete",
            WorkStatus::Timeout => "Timeout",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Result + Timestamps
// ---------------------------------------------------------------------------

/// Outcome slot of a work item. Written once, on submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkResult {
    /// Identifier of the work this result belongs to, attached on submission.
    pub work_id: Option<WorkId>,
    /// Serialized result payload. Opaque to the server.
    pub payload: String,
    pub status: WorkStatus,
    /// Application-level error from the worker, or "Timeout".
    pub error: Option<String>,
}

impl WorkResult {
    pub fn pending() -> Self {
        Self::default()
    }
}

/// Timestamps for a work item. `None` until the matching step happens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeStats {
    pub added: Option<DateTime<Utc>>,
    pub received: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    /// How long after `added` the item stays live.
    pub timeout: Duration,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Sequential worker identity, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u64);

impl WorkerId {
    pub fn parse(s: &str) -> Result<Self> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| Error::IdentityParse(s.to_string()))
    }
}

impl std::str::FromStr for WorkerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque session token granted after a successful verification.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// Tokens end up in events and logs; never print them.
impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

/// Challenge issued at registration and the response the worker sent back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub challenge: String,
    /// Decrypted response from the last verification attempt.
    pub response: Option<String>,
}

/// A worker as tracked by the registry.
///
/// `session` is set if and only if `registered` is true; only the registry
/// can change either.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Worker {
    pub id: WorkerId,
    registered: bool,
    pub verification: Verification,
    #[serde(skip)]
    session: Option<SessionToken>,
}

impl Worker {
    pub(crate) fn new(id: WorkerId, challenge: String) -> Self {
        Self {
            id,
            registered: false,
            verification: Verification {
                challenge,
                response: None,
            },
            session: None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn session_token(&self) -> Option<&SessionToken> {
        self.session.as_ref()
    }

    /// Mark verified and store the (possibly regenerated) token together.
    pub(crate) fn grant_session(&mut self, token: SessionToken) {
        self.registered = true;
        self.session = Some(token);
    }

    /// True if the worker is verified and `token` is its current token.
    pub(crate) fn accepts(&self, token: &str) -> bool {
        self.registered
            && self
                .session
                .as_ref()
                .is_some_and(|current| current.as_str() == token)
    }
}

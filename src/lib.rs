//! # jobgate
//!
//! Hands discrete units of work from a central server to anonymous,
//! untrusted workers. A worker proves it holds the shared secret by
//! encrypting a server-issued challenge, receives a session token, and
//! presents that token on every fetch.
//!
//! Everything is in-process and synchronous. Transports (HTTP, RPC) sit on
//! top of [`server::WorkServer`] and move its inputs and outputs over the
//! wire; observers attach to the [`event`] hooks.

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod model;
pub mod queue;
pub mod registry;
pub mod server;
pub mod telemetry;

pub use client::WorkerClient;
pub use error::{Error, Result};
pub use event::{Event, EventPayload, HandlerParams, Hook};
pub use lifecycle::create_work;
pub use model::{Work, WorkId, WorkStatus, Worker, WorkerId};
pub use server::WorkServer;

//! Secret handling utilities.
//!
//! Re-exports secrecy types so callers holding the shared secret do not
//! need a direct dependency on secrecy.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

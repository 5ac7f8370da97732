//! nodeman-store
//!
//! The phase-store boundary: a narrow key-value contract the checkpoint
//! layer is written against, plus the production Consul implementation.
//!
//! This crate defines **only** the store trait, its error type, and the
//! Consul HTTP client. What gets stored under which key is the checkpoint
//! crate's business; replication and consistency of the store itself are the
//! store's business.

use std::fmt;

mod consul;

pub use consul::{ConsulKv, ENV_HTTP_ADDR, ENV_HTTP_TOKEN};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a [`KvStore`] implementation may return.
///
/// All of these are non-fatal to callers at runtime — the checkpoint layer
/// logs and degrades. Only client *construction* failure is fatal, and that
/// is surfaced before any state-machine logic runs.
#[derive(Debug)]
pub enum StoreError {
    /// Network or transport failure.
    Transport(String),
    /// The store answered with a non-success status.
    Api { status: u16, message: String },
    /// A response payload could not be decoded.
    Decode(String),
    /// Client configuration is missing or invalid (bad base URL, etc.).
    Config(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Transport(msg) => write!(f, "store transport error: {msg}"),
            StoreError::Api { status, message } => {
                write!(f, "store api error status={status}: {message}")
            }
            StoreError::Decode(msg) => write!(f, "store decode error: {msg}"),
            StoreError::Config(msg) => write!(f, "store config error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

// ---------------------------------------------------------------------------
// KvStore trait
// ---------------------------------------------------------------------------

/// Durable key-value store contract.
///
/// Implementations must be object-safe so callers can hold an
/// `Arc<dyn KvStore>` without knowing the concrete type, and `Send + Sync`
/// because the sequence runner and the signal listener share one handle.
///
/// No operation holds store-side locks across calls; a multi-key update
/// built on this trait is not atomic.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Read the value stored under `key`. `Ok(None)` means the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write `value` under `key`, creating or overwriting.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

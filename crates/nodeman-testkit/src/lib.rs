//! nodeman-testkit
//!
//! Test doubles for the phase-store boundary. Production code never depends
//! on this crate; checkpoint and daemon tests drive their scenarios against
//! these instead of a live Consul agent.

use std::collections::HashMap;
use std::sync::Mutex;

use nodeman_store::{KvStore, StoreError};

// ---------------------------------------------------------------------------
// MemoryKv
// ---------------------------------------------------------------------------

/// In-memory [`KvStore`]. Shared-handle semantics match the real store:
/// clone-free, callers hold it behind an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry before the scenario starts.
    pub fn seed(&self, key: &str, value: &[u8]) {
        self.entries
            .lock()
            .expect("memory kv poisoned")
            .insert(key.to_string(), value.to_vec());
    }

    /// Direct snapshot read for assertions, bypassing the trait.
    pub fn snapshot(&self, key: &str) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .expect("memory kv poisoned")
            .get(key)
            .cloned()
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.snapshot(key))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.seed(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .expect("memory kv poisoned")
            .remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FailingKv
// ---------------------------------------------------------------------------

/// A store whose every operation fails with a transport error. Exercises the
/// log-and-degrade paths (failed loads keep defaults, failed saves leave the
/// previous persisted value in place).
#[derive(Debug, Default)]
pub struct FailingKv;

impl FailingKv {
    pub fn new() -> Self {
        Self
    }

    fn err(op: &str, key: &str) -> StoreError {
        StoreError::Transport(format!("injected failure: {op} {key:?}"))
    }
}

#[async_trait::async_trait]
impl KvStore for FailingKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(Self::err("get", key))
    }

    async fn put(&self, key: &str, _value: &[u8]) -> Result<(), StoreError> {
        Err(Self::err("put", key))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        Err(Self::err("delete", key))
    }
}

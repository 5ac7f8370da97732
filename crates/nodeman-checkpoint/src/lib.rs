//! nodeman-checkpoint
//!
//! Persists and restores the `(phase, trace context)` pair against the phase
//! store, and makes the resume-vs-fresh-start decision at startup.
//!
//! # Invariants
//!
//! - **Phase is written first.** If the phase write fails, the trace half is
//!   not attempted — a partial failure never leaves a newer trace chained to
//!   an older phase. The reverse window (new phase, stale trace) remains:
//!   the two writes are not transactional, and a crash between them costs
//!   span parentage on the next resume, never phase correctness.
//!
//! - **`Trace` present only while a cycle is in flight.** A completed cycle
//!   deletes the entry; a signal-triggered checkpoint (re)writes it.
//!
//! - **Load failures degrade, never abort.** A failed or unreadable phase
//!   read leaves the machine at its default; a failed or undecodable trace
//!   read starts a fresh root context. Diagnostics go through `tracing`.

use std::sync::Arc;

use tracing::warn;

use nodeman_fsm::Phase;
use nodeman_store::{KvStore, StoreError};
use nodeman_trace::{TraceClient, TraceHandle};

/// Store key holding the current phase wire name.
pub const KEY_APPLICATION_STATE: &str = "ApplicationState";
/// Store key holding the serialized trace header of an in-flight cycle.
pub const KEY_TRACE: &str = "Trace";

/// Checkpoint manager over the phase store.
pub struct CheckpointManager {
    store: Arc<dyn KvStore>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Resume the stored trace context, or start a fresh root.
    ///
    /// Returns the handle and whether it was resumed. Absence of a stored
    /// header is not an error condition — it is the signal to start fresh.
    /// This decision determines only which span parent the run uses; phase
    /// restoration is [`CheckpointManager::load_phase`]'s job.
    pub async fn resume_or_init(&self, trace: &TraceClient) -> (TraceHandle, bool) {
        match self.store.get(KEY_TRACE).await {
            Ok(Some(bytes)) if !bytes.is_empty() => match trace.resume(&bytes) {
                Ok(handle) => (handle, true),
                Err(e) => {
                    warn!(error = %e, "stored trace header unusable, starting fresh trace");
                    (trace.new_root(), false)
                }
            },
            Ok(_) => (trace.new_root(), false),
            Err(e) => {
                warn!(error = %e, "trace read failed, starting fresh trace");
                (trace.new_root(), false)
            }
        }
    }

    /// Load the persisted phase, if any.
    ///
    /// `None` on an absent entry, a read failure, or a value that is not a
    /// recognized phase wire name — in every case the caller keeps the
    /// machine's default initial phase.
    pub async fn load_phase(&self) -> Option<Phase> {
        let bytes = match self.store.get(KEY_APPLICATION_STATE).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "phase read failed, keeping default phase");
                return None;
            }
        };

        let Ok(name) = std::str::from_utf8(&bytes) else {
            warn!("stored phase is not utf-8, keeping default phase");
            return None;
        };
        match Phase::parse(name) {
            Some(phase) => Some(phase),
            None => {
                warn!(stored = %name, "stored phase unrecognized, keeping default phase");
                None
            }
        }
    }

    /// Persist the checkpoint pair.
    ///
    /// Writes the phase unconditionally. With a trace handle, writes its
    /// serialized header under [`KEY_TRACE`]; without one, deletes the entry
    /// to mark that no cycle is in flight.
    ///
    /// # Errors
    /// The first store failure is returned; callers log and continue. A
    /// failed phase write skips the trace half (see crate invariants).
    pub async fn save(
        &self,
        phase: Phase,
        trace: Option<&TraceHandle>,
    ) -> Result<(), StoreError> {
        self.store
            .put(KEY_APPLICATION_STATE, phase.as_str().as_bytes())
            .await?;

        match trace {
            Some(handle) => {
                self.store
                    .put(KEY_TRACE, &handle.serialize_headers())
                    .await
            }
            None => self.store.delete(KEY_TRACE).await,
        }
    }
}

//! nodeman-trace
//!
//! The trace-context carrier: propagation headers that survive process
//! restarts, and scoped spans over the callback and run boundaries.
//!
//! # Design
//!
//! A trace is identified by a `trace_id`; its serialized header also carries
//! the span id a future process should chain from. The carrier deliberately
//! owns the header format (a small versioned JSON blob) so the checkpoint
//! layer can treat it as opaque bytes.
//!
//! Span *transport* is out of scope: spans are emitted as structured
//! `tracing` events carrying the trace/span/parent ids, and the process-wide
//! subscriber decides where they go. The backend write key is held in the
//! config for the exporter's benefit and is never logged.
//!
//! # Chaining
//!
//! The first span started on a handle is the *run root*: it parents under
//! the restored span (if the handle was resumed) and replaces it as the id
//! the handle serializes. A checkpoint taken mid-run therefore points the
//! next process at this run's root span, and resume-then-serialize with no
//! span started round-trips the stored header byte-for-byte.

use std::fmt;
use std::io::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Env var holding the tracing backend write key (optional; never logged).
pub const ENV_TRACE_KEY: &str = "NODEMAN_TRACE_KEY";
/// Env var holding the tracing dataset identifier.
pub const ENV_TRACE_DATASET: &str = "NODEMAN_TRACE_DATASET";

const DEFAULT_DATASET: &str = "node-manager";
const HEADER_VERSION: u8 = 1;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Process-wide carrier configuration.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// Backend write key. Optional — local runs emit spans without one.
    pub write_key: Option<String>,
    /// Dataset the emitted spans belong to; propagated in headers.
    pub dataset: String,
    /// Service name attached to every span.
    pub service_name: String,
}

impl TraceConfig {
    pub fn from_env() -> Self {
        Self {
            write_key: std::env::var(ENV_TRACE_KEY).ok().filter(|k| !k.is_empty()),
            dataset: std::env::var(ENV_TRACE_DATASET)
                .ok()
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| DEFAULT_DATASET.to_string()),
            service_name: "node-manager".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Serialized propagation header. Field order is fixed by the struct so the
/// byte form is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TraceHeader {
    version: u8,
    trace_id: Uuid,
    span_id: Uuid,
    dataset: String,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from resuming a serialized trace context.
#[derive(Debug)]
pub enum TraceError {
    /// The header bytes could not be parsed.
    Decode(String),
    /// The header parsed but its version is unknown to this build.
    UnsupportedVersion(u8),
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceError::Decode(msg) => write!(f, "trace header decode error: {msg}"),
            TraceError::UnsupportedVersion(v) => {
                write!(f, "unsupported trace header version {v}")
            }
        }
    }
}

impl std::error::Error for TraceError {}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Process-wide trace client. Constructed once in `main` and passed down —
/// no ambient singleton.
#[derive(Debug, Clone)]
pub struct TraceClient {
    config: TraceConfig,
}

impl TraceClient {
    pub fn new(config: TraceConfig) -> Self {
        Self { config }
    }

    /// Start a brand-new root context (no prior run to chain from).
    pub fn new_root(&self) -> TraceHandle {
        let trace_id = Uuid::new_v4();
        TraceHandle::new(self, trace_id, None)
    }

    /// Resume a context from serialized headers; new spans chain as
    /// continuations of the stored span.
    pub fn resume(&self, header_bytes: &[u8]) -> Result<TraceHandle, TraceError> {
        let header: TraceHeader = serde_json::from_slice(header_bytes)
            .map_err(|e| TraceError::Decode(e.to_string()))?;
        if header.version != HEADER_VERSION {
            return Err(TraceError::UnsupportedVersion(header.version));
        }
        Ok(TraceHandle::new(
            self,
            header.trace_id,
            Some(header.span_id),
        ))
    }

    /// Flush pending emitted output. Spans are emitted synchronously through
    /// the subscriber, so this only needs to push stdout.
    pub fn flush(&self) {
        let _ = std::io::stdout().flush();
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

struct HandleState {
    /// Span id the header serializes — the restored span until the run root
    /// starts, then the run root.
    serialized_span: Uuid,
    /// Set once the first span of this run has started.
    run_root: Option<Uuid>,
    /// Continuation parent restored from a stored header, if any.
    resumed_from: Option<Uuid>,
}

/// One trace, owned by the driver for the duration of one run.
///
/// Cloneable and shared with the signal listener, which serializes headers
/// concurrently with the sequence thread starting spans.
#[derive(Clone)]
pub struct TraceHandle {
    trace_id: Uuid,
    dataset: String,
    service_name: String,
    state: Arc<Mutex<HandleState>>,
}

impl TraceHandle {
    fn new(client: &TraceClient, trace_id: Uuid, resumed_from: Option<Uuid>) -> Self {
        Self {
            trace_id,
            dataset: client.config.dataset.clone(),
            service_name: client.config.service_name.clone(),
            state: Arc::new(Mutex::new(HandleState {
                // A fresh root with no spans yet identifies the trace itself.
                serialized_span: resumed_from.unwrap_or(trace_id),
                run_root: None,
                resumed_from,
            })),
        }
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    /// `true` if this handle was resumed from a stored header.
    pub fn is_resumed(&self) -> bool {
        self.state.lock().expect("trace state poisoned").resumed_from.is_some()
    }

    /// Serialize the propagation header for checkpointing.
    pub fn serialize_headers(&self) -> Vec<u8> {
        let state = self.state.lock().expect("trace state poisoned");
        let header = TraceHeader {
            version: HEADER_VERSION,
            trace_id: self.trace_id,
            span_id: state.serialized_span,
            dataset: self.dataset.clone(),
        };
        serde_json::to_vec(&header).expect("trace header serialization cannot fail")
    }

    /// Start a span. The first span on a handle becomes the run root (and
    /// the id future checkpoints serialize); later spans are its children.
    ///
    /// The returned guard sends the span when dropped or explicitly sent —
    /// every exit path, including panics, releases it exactly once.
    pub fn start_span(&self, name: &str) -> SpanGuard {
        let span_id = Uuid::new_v4();
        let mut state = self.state.lock().expect("trace state poisoned");
        let parent_id = match state.run_root {
            Some(root) => Some(root),
            None => {
                state.run_root = Some(span_id);
                state.serialized_span = span_id;
                state.resumed_from
            }
        };
        drop(state);

        SpanGuard {
            name: name.to_string(),
            trace_id: self.trace_id,
            span_id,
            parent_id,
            dataset: self.dataset.clone(),
            service_name: self.service_name.clone(),
            start: Instant::now(),
            sent: false,
        }
    }
}

// ---------------------------------------------------------------------------
// SpanGuard
// ---------------------------------------------------------------------------

/// Scoped span. Emits on [`SpanGuard::send`] or on drop, whichever comes
/// first; emits at most once.
pub struct SpanGuard {
    name: String,
    trace_id: Uuid,
    span_id: Uuid,
    parent_id: Option<Uuid>,
    dataset: String,
    service_name: String,
    start: Instant,
    sent: bool,
}

impl SpanGuard {
    pub fn span_id(&self) -> Uuid {
        self.span_id
    }

    /// Send the span now.
    pub fn send(mut self) {
        self.emit();
    }

    fn emit(&mut self) {
        if self.sent {
            return;
        }
        self.sent = true;
        tracing::info!(
            target: "nodeman::span",
            span = %self.name,
            trace_id = %self.trace_id,
            span_id = %self.span_id,
            parent_id = ?self.parent_id,
            dataset = %self.dataset,
            service = %self.service_name,
            duration_ms = self.start.elapsed().as_millis() as u64,
            "span sent"
        );
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.emit();
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn client() -> TraceClient {
        TraceClient::new(TraceConfig {
            write_key: None,
            dataset: "test-dataset".to_string(),
            service_name: "node-manager".to_string(),
        })
    }

    /// Counts `nodeman::span` events delivered to the subscriber.
    struct CountingSubscriber(Arc<AtomicUsize>);

    impl tracing::Subscriber for CountingSubscriber {
        fn enabled(&self, metadata: &tracing::Metadata<'_>) -> bool {
            metadata.target() == "nodeman::span"
        }
        fn new_span(&self, _: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            tracing::span::Id::from_u64(1)
        }
        fn record(&self, _: &tracing::span::Id, _: &tracing::span::Record<'_>) {}
        fn record_follows_from(&self, _: &tracing::span::Id, _: &tracing::span::Id) {}
        fn event(&self, _: &tracing::Event<'_>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn enter(&self, _: &tracing::span::Id) {}
        fn exit(&self, _: &tracing::span::Id) {}
    }

    fn count_spans(f: impl FnOnce()) -> usize {
        let count = Arc::new(AtomicUsize::new(0));
        let subscriber = CountingSubscriber(Arc::clone(&count));
        tracing::subscriber::with_default(subscriber, f);
        count.load(Ordering::SeqCst)
    }

    #[test]
    fn resume_then_serialize_round_trips() {
        let client = client();
        let original = client.new_root();
        let _root = original.start_span("init");
        let stored = original.serialize_headers();

        let resumed = client.resume(&stored).unwrap();
        assert!(resumed.is_resumed());
        assert_eq!(resumed.serialize_headers(), stored);
    }

    #[test]
    fn fresh_root_is_not_resumed() {
        let handle = client().new_root();
        assert!(!handle.is_resumed());
    }

    #[test]
    fn first_span_becomes_run_root_and_parents_children() {
        let client = client();
        let original = client.new_root();
        let root = original.start_span("init");
        let stored = original.serialize_headers();
        drop(root);

        let resumed = client.resume(&stored).unwrap();
        let run = resumed.start_span("resume");
        // The run span chains under the stored span...
        assert_eq!(run.parent_id, resumed_parent(&stored));
        // ...and replaces it as the serialized continuation point.
        assert_ne!(resumed.serialize_headers(), stored);

        let child = resumed.start_span("launch-node");
        assert_eq!(child.parent_id, Some(run.span_id));
    }

    fn resumed_parent(stored: &[u8]) -> Option<Uuid> {
        let header: TraceHeader = serde_json::from_slice(stored).unwrap();
        Some(header.span_id)
    }

    #[test]
    fn garbage_header_is_a_decode_error() {
        assert!(matches!(
            client().resume(b"not json"),
            Err(TraceError::Decode(_))
        ));
    }

    #[test]
    fn unknown_header_version_is_rejected() {
        let bytes = serde_json::to_vec(&TraceHeader {
            version: 99,
            trace_id: Uuid::new_v4(),
            span_id: Uuid::new_v4(),
            dataset: "test-dataset".to_string(),
        })
        .unwrap();
        assert!(matches!(
            client().resume(&bytes),
            Err(TraceError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn guard_sends_exactly_once() {
        let sent = count_spans(|| {
            let handle = client().new_root();
            let span = handle.start_span("launch-node");
            span.send();
            // send() consumed the guard; drop already ran inside send().
        });
        assert_eq!(sent, 1);
    }

    #[test]
    fn guard_sends_on_drop() {
        let sent = count_spans(|| {
            let handle = client().new_root();
            let _span = handle.start_span("launch-node");
        });
        assert_eq!(sent, 1);
    }

    #[test]
    fn guard_sends_when_scope_panics() {
        let sent = count_spans(|| {
            let handle = client().new_root();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let _span = handle.start_span("node-healthy");
                panic!("callback blew up");
            }));
            assert!(result.is_err());
        });
        assert_eq!(sent, 1);
    }
}

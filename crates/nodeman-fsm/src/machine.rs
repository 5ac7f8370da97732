//! Node rotation state machine.
//!
//! # Design
//!
//! Explicit state machine for one node rotation cycle. Every lifecycle event
//! is applied via [`Machine::fire`], which enforces two invariants:
//!
//! 1. **Legal transitions only.** An event whose required source phase does
//!    not match the current phase returns [`TransitionError`] and leaves the
//!    machine untouched. Callers treat this as a diagnostic, not a fault —
//!    the scripted sequence keeps going.
//! 2. **Commit after callback.** The registered callback for an event runs
//!    *before* the destination phase is committed. A checkpoint snapshot
//!    taken while a callback is still executing therefore observes the
//!    source phase, and a resumed process replays the interrupted event.
//!
//! # State diagram
//!
//! ```text
//!          launch-node           node-up
//!   Idle ─────────────► Launching ───────► Validating
//!    ▲                                          │
//!    │         remove-old-node                  │ node-healthy
//!    └────────────────────────── Removing ◄─────┘
//! ```
//!
//! The graph is a simple cycle: every phase has exactly one outgoing
//! transition, so a full pass returns the machine to `Idle`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::phase::{Phase, PhaseCell};

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// Events that drive the rotation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Request a replacement node (`Idle → Launching`).
    LaunchNode,
    /// The replacement node booted (`Launching → Validating`).
    NodeUp,
    /// Health validation passed (`Validating → Removing`).
    NodeHealthy,
    /// The old node was decommissioned (`Removing → Idle`).
    RemoveOldNode,
}

impl Event {
    /// Wire name — used in progress lines and span names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::LaunchNode => "launch-node",
            Event::NodeUp => "node-up",
            Event::NodeHealthy => "node-healthy",
            Event::RemoveOldNode => "remove-old-node",
        }
    }

    /// The scripted order of one full rotation cycle.
    pub const SEQUENCE: [Event; 4] = [
        Event::LaunchNode,
        Event::NodeUp,
        Event::NodeHealthy,
        Event::RemoveOldNode,
    ];
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

struct Transition {
    event: Event,
    src: Phase,
    dst: Phase,
}

/// The rotation cycle. At most one transition per (event, source) pair.
const TRANSITIONS: [Transition; 4] = [
    Transition {
        event: Event::LaunchNode,
        src: Phase::Idle,
        dst: Phase::Launching,
    },
    Transition {
        event: Event::NodeUp,
        src: Phase::Launching,
        dst: Phase::Validating,
    },
    Transition {
        event: Event::NodeHealthy,
        src: Phase::Validating,
        dst: Phase::Removing,
    },
    Transition {
        event: Event::RemoveOldNode,
        src: Phase::Removing,
        dst: Phase::Idle,
    },
];

fn destination(event: Event, from: Phase) -> Option<Phase> {
    TRANSITIONS
        .iter()
        .find(|t| t.event == event && t.src == from)
        .map(|t| t.dst)
}

// ---------------------------------------------------------------------------
// TransitionError
// ---------------------------------------------------------------------------

/// Returned when an event has no transition out of the current phase.
///
/// Non-fatal: the machine is left unchanged and the caller decides whether
/// to log and continue. Note that a rejected event can leave the scripted
/// sequence out of step with the actual phase for the rest of the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    /// The rejected event.
    pub event: Event,
    /// The phase the machine was in when the event was fired.
    pub from: Phase,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "event {} inappropriate in current phase {}",
            self.event, self.from
        )
    }
}

impl std::error::Error for TransitionError {}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

/// Context handed to a transition callback while it runs.
#[derive(Debug, Clone, Copy)]
pub struct EventContext {
    pub event: Event,
    /// Phase the machine is leaving. Still the committed phase while the
    /// callback runs.
    pub from: Phase,
    /// Phase that will be committed once the callback returns.
    pub to: Phase,
}

/// Transition side-effect handler.
///
/// Infallible by signature: the destination phase is committed whenever the
/// handler returns. Handlers may block (a provisioning wait of several
/// seconds is expected); `fire` does not return until the handler does.
pub type Callback = Box<dyn FnMut(&EventContext) + Send>;

/// The node rotation state machine.
///
/// Mutated only by the single thread driving the event sequence. The signal
/// listener shares the [`PhaseCell`] returned by [`Machine::phase_cell`] for
/// its concurrent snapshot read; it never mutates.
pub struct Machine {
    cell: Arc<PhaseCell>,
    callbacks: HashMap<Event, Callback>,
}

impl Machine {
    /// New machine starting at `initial` with no callbacks registered.
    pub fn new(initial: Phase) -> Self {
        Self {
            cell: Arc::new(PhaseCell::new(initial)),
            callbacks: HashMap::new(),
        }
    }

    /// The committed current phase.
    pub fn current(&self) -> Phase {
        self.cell.load()
    }

    /// Overwrite the current phase without transition validation.
    ///
    /// Used only to seed a restored phase at construction/resume time.
    pub fn set_initial(&mut self, phase: Phase) {
        self.cell.store(phase);
    }

    /// Shared snapshot handle for the signal path.
    pub fn phase_cell(&self) -> Arc<PhaseCell> {
        Arc::clone(&self.cell)
    }

    /// Register the callback for `event`, replacing any existing one.
    /// Each event has at most one callback.
    pub fn on<F>(&mut self, event: Event, callback: F)
    where
        F: FnMut(&EventContext) + Send + 'static,
    {
        self.callbacks.insert(event, Box::new(callback));
    }

    /// Fire an event.
    ///
    /// Looks up the transition for (`event`, current phase). If none exists,
    /// returns [`TransitionError`] without mutating state. Otherwise runs
    /// the registered callback (if any) synchronously, then commits the
    /// destination phase.
    ///
    /// A panicking callback propagates before the commit — the machine stays
    /// at the source phase.
    pub fn fire(&mut self, event: Event) -> Result<(), TransitionError> {
        let from = self.current();
        let Some(to) = destination(event, from) else {
            return Err(TransitionError { event, from });
        };

        if let Some(cb) = self.callbacks.get_mut(&event) {
            cb(&EventContext { event, from, to });
        }

        self.cell.store(to);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn full_cycle_visits_phases_in_order() {
        let mut m = Machine::new(Phase::Idle);
        let expected = [
            Phase::Launching,
            Phase::Validating,
            Phase::Removing,
            Phase::Idle,
        ];
        for (event, want) in Event::SEQUENCE.into_iter().zip(expected) {
            m.fire(event).unwrap();
            assert_eq!(m.current(), want);
        }
    }

    #[test]
    fn event_from_wrong_phase_is_rejected_without_mutation() {
        let mut m = Machine::new(Phase::Idle);
        let err = m.fire(Event::NodeUp).unwrap_err();
        assert_eq!(err.event, Event::NodeUp);
        assert_eq!(err.from, Phase::Idle);
        assert_eq!(m.current(), Phase::Idle);
    }

    #[test]
    fn every_undefined_pair_is_a_noop() {
        for from in Phase::ALL {
            for event in Event::SEQUENCE {
                if destination(event, from).is_some() {
                    continue;
                }
                let mut m = Machine::new(from);
                assert_eq!(
                    m.fire(event),
                    Err(TransitionError { event, from }),
                    "{event} from {from}"
                );
                assert_eq!(m.current(), from, "{event} from {from} mutated phase");
            }
        }
    }

    #[test]
    fn callback_runs_before_commit() {
        let mut m = Machine::new(Phase::Idle);
        let cell = m.phase_cell();
        m.on(Event::LaunchNode, move |ctx| {
            // Snapshot taken mid-callback sees the source phase.
            assert_eq!(cell.load(), Phase::Idle);
            assert_eq!(ctx.from, Phase::Idle);
            assert_eq!(ctx.to, Phase::Launching);
        });
        m.fire(Event::LaunchNode).unwrap();
        assert_eq!(m.current(), Phase::Launching);
    }

    #[test]
    fn rejected_event_does_not_invoke_callback() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut m = Machine::new(Phase::Idle);
        let counter = Arc::clone(&hits);
        m.on(Event::NodeUp, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(m.fire(Event::NodeUp).is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn set_initial_bypasses_validation() {
        let mut m = Machine::new(Phase::Idle);
        m.set_initial(Phase::Validating);
        assert_eq!(m.current(), Phase::Validating);
        // The cycle continues from the restored phase.
        m.fire(Event::NodeHealthy).unwrap();
        assert_eq!(m.current(), Phase::Removing);
    }

    #[test]
    fn panicking_callback_leaves_source_phase_committed() {
        let mut m = Machine::new(Phase::Idle);
        m.on(Event::LaunchNode, |_| panic!("boom"));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = m.fire(Event::LaunchNode);
        }));
        assert!(result.is_err());
        assert_eq!(m.current(), Phase::Idle);
    }
}

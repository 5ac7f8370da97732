//! Lifecycle phases and the cross-thread phase snapshot cell.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// All phases a managed node can occupy.
///
/// Exactly one phase is current at any instant. Together with the optional
/// trace header, the current phase is the entire durable state of the
/// machine — everything else is reconstructed on restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No rotation in progress. Initial phase of a fresh cycle.
    Idle,
    /// Replacement node requested; waiting for it to come up.
    Launching,
    /// Replacement node is up; health checks running.
    Validating,
    /// Replacement node is healthy; old node being decommissioned.
    Removing,
}

impl Phase {
    /// All phases, in cycle order starting from [`Phase::Idle`].
    pub const ALL: [Phase; 4] = [
        Phase::Idle,
        Phase::Launching,
        Phase::Validating,
        Phase::Removing,
    ];

    /// Wire name — the exact string persisted to the store and printed in
    /// progress lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Launching => "launching",
            Phase::Validating => "validating",
            Phase::Removing => "removing",
        }
    }

    /// Parse a wire name back into a phase. Returns `None` for anything that
    /// is not exactly one of the four wire names — callers decide whether
    /// that is a warning (stale store contents) or a bug.
    pub fn parse(s: &str) -> Option<Phase> {
        match s {
            "idle" => Some(Phase::Idle),
            "launching" => Some(Phase::Launching),
            "validating" => Some(Phase::Validating),
            "removing" => Some(Phase::Removing),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PhaseCell
// ---------------------------------------------------------------------------

/// Thread-safe single-value cell holding the current phase.
///
/// Written only by the sequence thread when a transition commits; read
/// concurrently by the signal listener taking its checkpoint snapshot. The
/// snapshot may race an in-flight transition — the value observed is always
/// the last *committed* phase, never a half-applied one.
#[derive(Debug)]
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub fn new(phase: Phase) -> Self {
        Self(AtomicU8::new(encode(phase)))
    }

    /// Snapshot read. Safe from any thread.
    pub fn load(&self) -> Phase {
        decode(self.0.load(Ordering::SeqCst))
    }

    /// Commit a new phase. Called only by the sequence thread.
    pub fn store(&self, phase: Phase) {
        self.0.store(encode(phase), Ordering::SeqCst);
    }
}

fn encode(phase: Phase) -> u8 {
    match phase {
        Phase::Idle => 0,
        Phase::Launching => 1,
        Phase::Validating => 2,
        Phase::Removing => 3,
    }
}

fn decode(v: u8) -> Phase {
    match v {
        0 => Phase::Idle,
        1 => Phase::Launching,
        2 => Phase::Validating,
        3 => Phase::Removing,
        // Unreachable: the cell is only ever written through `encode`.
        _ => unreachable!("corrupt phase cell value {v}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for p in Phase::ALL {
            assert_eq!(Phase::parse(p.as_str()), Some(p));
        }
    }

    #[test]
    fn unknown_wire_name_rejected() {
        assert_eq!(Phase::parse("IDLE"), None);
        assert_eq!(Phase::parse(""), None);
        assert_eq!(Phase::parse("terminated"), None);
    }

    #[test]
    fn cell_round_trips_all_phases() {
        let cell = PhaseCell::new(Phase::Idle);
        for p in Phase::ALL {
            cell.store(p);
            assert_eq!(cell.load(), p);
        }
    }
}

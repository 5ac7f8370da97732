//! nodeman-fsm
//!
//! The node rotation state machine core:
//! - Closed `Phase` / `Event` enumerations with stable wire names
//! - A cyclic transition table with reject-without-mutating semantics
//! - Callback dispatch run synchronously inside the guarded transition
//! - An atomic [`PhaseCell`] so the signal listener can snapshot the
//!   committed phase concurrently with a running callback
//!
//! Pure in-process logic. No IO, no runtime — persistence and tracing wrap
//! this crate from the outside.

mod machine;
mod phase;

pub use machine::{Callback, Event, EventContext, Machine, TransitionError};
pub use phase::{Phase, PhaseCell};

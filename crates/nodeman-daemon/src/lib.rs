//! nodeman-daemon
//!
//! The lifecycle driver: wires the state machine, checkpoint manager, phase
//! store and trace carrier together, runs the scripted rotation sequence,
//! and owns the signal-triggered checkpoint-and-exit path. `main.rs` stays
//! thin; everything testable lives here.

pub mod config;
pub mod driver;

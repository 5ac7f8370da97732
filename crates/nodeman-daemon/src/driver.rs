//! Lifecycle driver.
//!
//! Runs one full pass of the scripted rotation sequence on the state
//! machine, with the interrupt-driven checkpoint racing it:
//!
//! - the **sequence runner** (a blocking-capable task, since callbacks may
//!   block for seconds) fires the four events in order and commits phases;
//! - the **signal listener** idles until SIGINT/SIGTERM, then snapshots the
//!   committed phase, persists `(phase, trace)`, sends the run span, flushes
//!   and exits the process with code 0.
//!
//! The two share only the store handle, the [`PhaseCell`] snapshot, and the
//! run-span slot. A signal arriving mid-callback does not cancel the
//! callback; the phase persisted is the one committed *before* the in-flight
//! transition, so a restarted process replays the interrupted event.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use nodeman_checkpoint::CheckpointManager;
use nodeman_fsm::{Event, EventContext, Machine, Phase, PhaseCell};
use nodeman_store::KvStore;
use nodeman_trace::{SpanGuard, TraceClient, TraceHandle};

use crate::config::DriverConfig;

/// Slot holding the top-level run span. Whichever path finishes the run —
/// normal completion or the signal listener — takes and sends it.
type RunSpanSlot = Arc<Mutex<Option<SpanGuard>>>;

/// Drive one rotation cycle to completion (or to signal-triggered exit).
///
/// Resumes phase and trace context from the store, runs the scripted
/// sequence, then marks the cycle complete by persisting the final phase
/// with no trace context.
pub async fn run(
    store: Arc<dyn KvStore>,
    trace: TraceClient,
    config: DriverConfig,
) -> Result<()> {
    let ckpt = Arc::new(CheckpointManager::new(store));

    let (handle, resumed) = ckpt.resume_or_init(&trace).await;
    let run_span: RunSpanSlot = Arc::new(Mutex::new(Some(
        handle.start_span(if resumed { "resume" } else { "init" }),
    )));

    let mut machine = build_machine(&handle, config.provision_wait);
    if let Some(phase) = ckpt.load_phase().await {
        machine.set_initial(phase);
    }
    let cell = machine.phase_cell();
    info!(phase = %machine.current(), resumed, "starting rotation cycle");

    spawn_signal_listener(
        Arc::clone(&ckpt),
        Arc::clone(&cell),
        handle.clone(),
        trace.clone(),
        Arc::clone(&run_span),
    );

    tokio::task::spawn_blocking(move || run_sequence(&mut machine))
        .await
        .context("sequence task panicked")?;

    if let Some(span) = run_span.lock().expect("run span slot poisoned").take() {
        span.send();
    }

    let final_phase = cell.load();
    if let Err(e) = ckpt.save(final_phase, None).await {
        warn!(error = %e, "cycle-complete checkpoint failed");
    }
    trace.flush();
    info!(phase = %final_phase, "rotation cycle complete");
    Ok(())
}

/// Build the rotation machine with its side-effect callbacks, each wrapped
/// in a span covering exactly the callback's execution.
pub fn build_machine(handle: &TraceHandle, provision_wait: Duration) -> Machine {
    let mut machine = Machine::new(Phase::Idle);

    machine.on(
        Event::LaunchNode,
        traced(handle, |ctx: &EventContext| {
            info!(phase = %ctx.from, "launch node requested");
        }),
    );
    machine.on(
        Event::NodeUp,
        traced(handle, move |ctx: &EventContext| {
            // The replacement node takes a while to boot; the sequence
            // thread is expected to block here.
            std::thread::sleep(provision_wait);
            info!(phase = %ctx.from, "node up");
        }),
    );
    machine.on(
        Event::NodeHealthy,
        traced(handle, |ctx: &EventContext| {
            info!(phase = %ctx.from, "node healthy");
        }),
    );
    machine.on(
        Event::RemoveOldNode,
        traced(handle, |ctx: &EventContext| {
            info!(phase = %ctx.from, "old node removed");
        }),
    );

    machine
}

/// Wrap a callback so a span named after the event covers its execution.
/// The guard sends the span on every exit path, including a panicking
/// callback.
fn traced<F>(handle: &TraceHandle, mut callback: F) -> impl FnMut(&EventContext) + Send + 'static
where
    F: FnMut(&EventContext) + Send + 'static,
{
    let handle = handle.clone();
    move |ctx| {
        let span = handle.start_span(ctx.event.as_str());
        callback(ctx);
        span.send();
    }
}

/// Fire the scripted event sequence. Rejected transitions are reported and
/// the sequence continues — state is unchanged by a rejection, so the
/// remaining events re-synchronize with whatever phase was restored.
pub fn run_sequence(machine: &mut Machine) {
    for (step, event) in Event::SEQUENCE.into_iter().enumerate() {
        if let Err(e) = machine.fire(event) {
            warn!(error = %e, "transition rejected");
        }
        info!(step = step + 1, phase = %machine.current(), "sequence step done");
    }
}

/// The signal-path checkpoint: snapshot the committed phase and persist the
/// `(phase, trace)` pair. Store failures are reported and swallowed — the
/// previous persisted pair stays in place.
///
/// Returns the phase that was snapshotted.
pub async fn signal_checkpoint(
    ckpt: &CheckpointManager,
    cell: &PhaseCell,
    handle: &TraceHandle,
) -> Phase {
    let phase = cell.load();
    if let Err(e) = ckpt.save(phase, Some(handle)).await {
        warn!(error = %e, "signal checkpoint failed");
    }
    phase
}

fn spawn_signal_listener(
    ckpt: Arc<CheckpointManager>,
    cell: Arc<PhaseCell>,
    handle: TraceHandle,
    trace: TraceClient,
    run_span: RunSpanSlot,
) {
    tokio::spawn(async move {
        let signal = wait_for_termination().await;
        let phase = signal_checkpoint(&ckpt, &cell, &handle).await;
        if let Some(span) = run_span.lock().expect("run span slot poisoned").take() {
            span.send();
        }
        trace.flush();
        info!(signal, phase = %phase, "terminating after signal checkpoint");
        std::process::exit(0);
    });
}

async fn wait_for_termination() -> &'static str {
    tokio::select! {
        _ = interrupt_signal() => "interrupt",
        _ = terminate_signal() => "terminate",
    }
}

async fn interrupt_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "interrupt listener failed");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "terminate listener unavailable");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}

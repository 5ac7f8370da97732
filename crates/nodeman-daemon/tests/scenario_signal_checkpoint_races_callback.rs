// The signal-path checkpoint races a still-running callback. The phase it
// persists is the last *committed* one — the source phase of the in-flight
// transition — because commit happens only after the callback returns.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use nodeman_checkpoint::{CheckpointManager, KEY_APPLICATION_STATE, KEY_TRACE};
use nodeman_daemon::driver;
use nodeman_fsm::{Event, Machine, Phase};
use nodeman_store::KvStore;
use nodeman_testkit::MemoryKv;
use nodeman_trace::{TraceClient, TraceConfig};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn signal_during_callback_persists_pre_transition_phase() {
    let store = Arc::new(MemoryKv::new());
    let ckpt = CheckpointManager::new(Arc::clone(&store) as Arc<dyn KvStore>);

    let trace = TraceClient::new(TraceConfig {
        write_key: None,
        dataset: "test-dataset".to_string(),
        service_name: "node-manager".to_string(),
    });
    let handle = trace.new_root();

    // Machine resumed mid-cycle at `validating`, with a `node-healthy`
    // callback that blocks until the test releases it — standing in for a
    // long health check in progress when the signal arrives.
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let mut machine = Machine::new(Phase::Idle);
    machine.set_initial(Phase::Validating);
    machine.on(Event::NodeHealthy, move |_| {
        entered_tx.send(()).unwrap();
        release_rx.recv().unwrap();
    });
    let cell = machine.phase_cell();

    let sequence = tokio::task::spawn_blocking(move || {
        machine.fire(Event::NodeHealthy).unwrap();
        machine
    });

    // Wait until the callback is definitely executing.
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("callback never started");

    // "Signal arrives": checkpoint while the callback is still blocked.
    let snapshotted = driver::signal_checkpoint(&ckpt, &cell, &handle).await;
    assert_eq!(snapshotted, Phase::Validating);
    assert_eq!(
        store.snapshot(KEY_APPLICATION_STATE).as_deref(),
        Some(b"validating".as_ref()),
        "the in-flight transition must not be visible to the checkpoint"
    );
    assert_eq!(
        store.snapshot(KEY_TRACE).as_deref(),
        Some(handle.serialize_headers().as_slice()),
        "signal checkpoint keeps the trace in flight"
    );

    // Let the callback finish; the transition then commits in memory only.
    release_tx.send(()).unwrap();
    let machine = sequence.await.unwrap();
    assert_eq!(machine.current(), Phase::Removing);
    assert_eq!(
        store.snapshot(KEY_APPLICATION_STATE).as_deref(),
        Some(b"validating".as_ref()),
        "no further checkpoint happens after the signal path"
    );
}

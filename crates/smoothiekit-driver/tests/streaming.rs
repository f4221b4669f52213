//! End-to-end streaming scenarios against a mock link.

mod common;

use common::{controller, count_writes, ready_controller, writes};
use smoothiekit_driver::Command;
use smoothiekit_core::{DriverConfig, HoldReason, MachineState, SessionEvent, WorkflowState};
use std::time::{Duration, Instant};

const DWELL: &str = "G4 P0.5 (%wait)\n";

fn load_and_start(
    c: &mut smoothiekit_driver::SmoothieController,
    gcode: &str,
    now: Instant,
) {
    c.dispatch(
        Command::SenderLoad {
            name: "job.nc".to_string(),
            gcode: gcode.to_string(),
            context: None,
        },
        now,
    )
    .unwrap();
    c.dispatch(Command::SenderStart, now).unwrap();
}

#[test]
fn happy_path_stream_to_completion() {
    let t0 = Instant::now();
    let (mut c, sent) = ready_controller(DriverConfig::default(), t0);

    load_and_start(&mut c, "G1 X1\nG1 X2\nG1 X3", t0);
    assert_eq!(c.workflow_state(), WorkflowState::Running);

    // Everything fits in the 120-byte budget, so all four lines go out.
    let out = writes(&sent);
    assert_eq!(out, vec!["G1 X1\n", "G1 X2\n", "G1 X3\n", DWELL]);
    assert_eq!(c.sender().sent(), 4);
    assert!(c.sender().is_holding()); // %wait trailer

    let t_acks = t0 + Duration::from_millis(100);
    for _ in 0..4 {
        c.on_data(b"ok\n", t_acks);
    }
    assert_eq!(c.sender().received(), 4);
    assert!(c.sender().at_end());
    assert!(c.sender().finished_at().is_some());
    assert_eq!(c.workflow_state(), WorkflowState::Running);

    // Machine reports idle; after the 500 ms idle window the workflow
    // returns to idle on its own.
    c.on_data(b"<Idle|MPos:0.000,0.000,0.000|WPos:0.000,0.000,0.000>\n", t_acks);
    c.on_tick(t_acks + Duration::from_millis(600));
    assert_eq!(c.workflow_state(), WorkflowState::Idle);
}

#[test]
fn mid_stream_pause_via_m0() {
    let t0 = Instant::now();
    let (mut c, sent) = ready_controller(DriverConfig::default(), t0);

    load_and_start(&mut c, "G1 X1\nM0\nG1 X2", t0);

    // Streaming stops right after the M0 line goes out.
    assert_eq!(writes(&sent), vec!["G1 X1\n", "M0\n"]);
    assert_eq!(c.workflow_state(), WorkflowState::Paused);
    assert_eq!(
        c.workflow_reason(),
        Some(&HoldReason::Data("M0".to_string()))
    );

    // The sender keeps draining acks while paused.
    c.on_data(b"ok\nok\n", t0);
    assert_eq!(c.sender().received(), 2);
    assert_eq!(c.sender().sent(), 2);

    // Resume releases the cycle-start byte and the rest of the program.
    c.dispatch(Command::SenderResume, t0).unwrap();
    assert_eq!(c.workflow_state(), WorkflowState::Running);
    let out = writes(&sent);
    assert_eq!(out[2], "~");
    assert_eq!(out[3], "G1 X2\n");
    assert_eq!(out[4], DWELL);
}

#[test]
fn machine_error_pauses_workflow() {
    let t0 = Instant::now();
    let (mut c, sent) = ready_controller(DriverConfig::default(), t0);
    let (_id, mut events) = c.subscribe();

    load_and_start(&mut c, "G1 X1\nG1 X2\nG1 X3", t0);
    c.on_data(b"ok\n", t0);

    let raw = "error: Unsupported command";
    c.on_data(format!("{}\n", raw).as_bytes(), t0);

    assert_eq!(c.workflow_state(), WorkflowState::Paused);
    assert_eq!(c.workflow_reason(), Some(&HoldReason::Err(raw.to_string())));
    // The ack is still consumed and next() is a no-op under hold.
    assert_eq!(c.sender().received(), 2);
    assert_eq!(writes(&sent).len(), 4); // nothing new went out

    let mut reads = Vec::new();
    while let Ok(message) = events.try_recv() {
        if let SessionEvent::ConnectionRead { raw } = message.event {
            reads.push(raw);
        }
    }
    assert!(reads.contains(&"> G1 X2 (line=2)".to_string()));
    assert!(reads.contains(&raw.to_string()));
}

#[test]
fn machine_error_ignored_when_configured() {
    let t0 = Instant::now();
    let mut config = DriverConfig::default();
    config.exception.ignore_errors = true;
    let (mut c, _sent) = ready_controller(config, t0);

    load_and_start(&mut c, "G1 X1\nG1 X2", t0);
    c.on_data(b"error: Unsupported command\n", t0);

    assert_eq!(c.workflow_state(), WorkflowState::Running);
    assert_eq!(c.sender().received(), 1);
}

#[test]
fn feeder_waits_for_sender_gap_while_running() {
    let t0 = Instant::now();
    let (mut c, sent) = ready_controller(DriverConfig::default(), t0);

    load_and_start(&mut c, "G1 X1\nG1 X2", t0);
    assert_eq!(c.sender().sent(), 3); // two lines plus the dwell

    c.dispatch(
        Command::Gcode {
            commands: "G91".to_string(),
            context: None,
        },
        t0,
    )
    .unwrap();

    // Queued, but not written while the sender has lines outstanding.
    assert_eq!(c.feeder().len(), 1);
    assert_eq!(count_writes(&sent, "G91\n"), 0);

    c.on_data(b"ok\nok\n", t0);
    assert_eq!(count_writes(&sent, "G91\n"), 0);

    // The final ack empties the sender queue; the feeder line follows.
    c.on_data(b"ok\n", t0);
    assert_eq!(count_writes(&sent, "G91\n"), 1);
    assert!(c.feeder().is_pending());
}

#[test]
fn blank_program_completes_via_trailing_dwell() {
    let t0 = Instant::now();
    let (mut c, sent) = ready_controller(DriverConfig::default(), t0);

    load_and_start(&mut c, "; setup notes\n\n; more notes", t0);

    // Only the dwell reaches the wire; blank lines advance silently.
    assert_eq!(writes(&sent), vec![DWELL]);
    assert_eq!(c.sender().total(), 4);
    assert_eq!(c.sender().sent(), 4);

    c.on_data(b"ok\n", t0);
    assert!(c.sender().at_end());
    assert!(c.sender().finished_at().is_some());
}

#[test]
fn stop_rewinds_regardless_of_prior_state() {
    let t0 = Instant::now();
    let (mut c, _sent) = ready_controller(DriverConfig::default(), t0);

    load_and_start(&mut c, "G1 X1\nG1 X2\nG1 X3", t0);
    c.on_data(b"ok\n", t0);
    c.dispatch(Command::SenderStop, t0).unwrap();

    assert_eq!(c.workflow_state(), WorkflowState::Idle);
    assert_eq!(c.sender().sent(), 0);
    assert_eq!(c.sender().received(), 0);
    assert_eq!(c.sender().queue_len(), 0);
    assert_eq!(c.sender().data_length(), 0);
    assert_eq!(c.sender().total(), 4); // program stays loaded
}

#[test]
fn stop_releases_firmware_feed_hold() {
    let t0 = Instant::now();
    let (mut c, sent) = ready_controller(DriverConfig::default(), t0);

    load_and_start(&mut c, "G1 X1", t0);
    c.dispatch(Command::SenderPause, t0).unwrap();
    assert_eq!(count_writes(&sent, "!"), 1);

    c.on_data(b"<Hold|MPos:0,0,0|WPos:0,0,0>\n", t0);
    c.dispatch(Command::SenderStop, t0).unwrap();
    assert_eq!(count_writes(&sent, "~"), 1);
}

#[test]
fn startup_handshake_sequencing() {
    let t0 = Instant::now();
    let (mut c, sent) = controller(DriverConfig::default());
    c.open(t0).unwrap();

    // Nothing goes out while the bootloader settles.
    c.poll_init(t0 + Duration::from_millis(500));
    assert!(writes(&sent).is_empty());
    assert!(!c.is_ready());

    c.poll_init(t0 + Duration::from_millis(1000));
    assert_eq!(writes(&sent), vec!["version\n"]);
    assert!(!c.is_ready());

    c.poll_init(t0 + Duration::from_millis(1060));
    assert!(c.is_ready());
}

#[test]
fn load_rejects_empty_program() {
    let t0 = Instant::now();
    let (mut c, _sent) = ready_controller(DriverConfig::default(), t0);

    let result = c.dispatch(
        Command::SenderLoad {
            name: "empty.nc".to_string(),
            gcode: "   \n  ".to_string(),
            context: None,
        },
        t0,
    );
    assert!(result.is_err());
    assert!(!c.sender().is_loaded());
}

#[test]
fn unload_restores_initial_sender_state() {
    let t0 = Instant::now();
    let (mut c, _sent) = ready_controller(DriverConfig::default(), t0);

    load_and_start(&mut c, "G1 X1", t0);
    c.dispatch(Command::SenderUnload, t0).unwrap();

    assert_eq!(c.workflow_state(), WorkflowState::Idle);
    assert!(!c.sender().is_loaded());
    assert_eq!(c.sender().total(), 0);
    assert_eq!(c.sender().sent(), 0);
}

#[test]
fn alarm_resets_feeder_and_suppresses_writes() {
    let t0 = Instant::now();
    let (mut c, sent) = ready_controller(DriverConfig::default(), t0);

    c.dispatch(
        Command::Gcode {
            commands: "G0 X1".to_string(),
            context: None,
        },
        t0,
    )
    .unwrap();
    assert_eq!(count_writes(&sent, "G0 X1\n"), 1);

    c.on_data(b"ALARM: Hard limit\n", t0);
    assert_eq!(c.snapshot().machine_state, MachineState::Alarm);
    assert!(!c.feeder().is_pending());

    // New feeder work is dropped while the alarm stands.
    c.dispatch(
        Command::Gcode {
            commands: "G0 X2".to_string(),
            context: None,
        },
        t0,
    )
    .unwrap();
    assert_eq!(count_writes(&sent, "G0 X2\n"), 0);
    assert!(c.feeder().is_empty());
}

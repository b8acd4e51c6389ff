mod common;

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use common::{wait_for, FakeOpener, LinkLog};
use line_follower::lifecycle::JoinOutcome;
use line_follower::transport::{SessionState, TransportSettings, TransportWorker};
use line_follower::{Command, CommandSlot, DecisionEngine, StopSignal, SteeringBands};

const WAIT: Duration = Duration::from_secs(2);

fn settings() -> TransportSettings {
    TransportSettings {
        command_poll: Duration::from_millis(10),
        echo: true,
    }
}

#[test]
fn sends_newest_command_then_closes_on_stop() {
    let log = LinkLog::default();
    let commands = Arc::new(CommandSlot::new(5));
    commands.put(Command::Left);
    commands.put(Command::Right);

    let stop = StopSignal::new();
    let mut handle = TransportWorker::new(
        Box::new(FakeOpener::new(&log)),
        commands.clone(),
        stop.clone(),
        settings(),
    )
    .spawn()
    .unwrap();

    assert!(wait_for(WAIT, || !log.lines().is_empty()));
    assert_eq!(handle.session.state(), SessionState::Open);
    stop.trigger();

    let JoinOutcome::Finished(summary) = handle.worker.join_timeout(WAIT) else {
        panic!("transport worker did not finish");
    };
    assert_eq!(log.lines(), vec!["RIGHT\n".to_string()]);
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.final_state, Some(SessionState::Closed));
    assert_eq!(handle.session.state(), SessionState::Closed);
    assert_eq!(commands.stats().skipped, 1);
}

#[test]
fn write_timeout_is_logged_and_loop_continues() {
    let log = LinkLog::default();
    let mut opener = FakeOpener::new(&log);
    opener.write_script = vec![Some(ErrorKind::TimedOut)];
    let commands = Arc::new(CommandSlot::new(5));
    let stop = StopSignal::new();
    let mut handle = TransportWorker::new(Box::new(opener), commands.clone(), stop.clone(), settings())
        .spawn()
        .unwrap();

    commands.put(Command::Stop);
    assert!(wait_for(WAIT, || log.attempts() == 1));
    commands.put(Command::Forward);
    assert!(wait_for(WAIT, || !log.lines().is_empty()));
    stop.trigger();

    let JoinOutcome::Finished(summary) = handle.worker.join_timeout(WAIT) else {
        panic!("transport worker did not finish");
    };
    assert_eq!(summary.timeouts, 1);
    assert_eq!(summary.sent, 1);
    assert_eq!(log.lines(), vec!["FORWARD\n".to_string()]);
    assert_eq!(summary.final_state, Some(SessionState::Closed));
}

#[test]
fn write_error_fails_session_without_reconnecting() {
    let log = LinkLog::default();
    let mut opener = FakeOpener::new(&log);
    opener.write_script = vec![Some(ErrorKind::BrokenPipe)];
    let commands = Arc::new(CommandSlot::new(5));
    let stop = StopSignal::new();
    let mut handle = TransportWorker::new(Box::new(opener), commands.clone(), stop.clone(), settings())
        .spawn()
        .unwrap();

    commands.put(Command::Left);
    // Exits by itself: the stop signal is never raised.
    let JoinOutcome::Finished(summary) = handle.worker.join_timeout(WAIT) else {
        panic!("transport worker did not exit after a fatal write error");
    };
    assert!(!stop.is_set());
    assert_eq!(summary.final_state, Some(SessionState::Failed));
    assert_eq!(handle.session.state(), SessionState::Failed);
    assert_eq!(summary.sent, 0);
    assert_eq!(log.opened(), 1);

    // Later commands pile up in the slot; nobody reopens the link.
    commands.put(Command::Right);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(log.opened(), 1);
    assert_eq!(commands.len(), 1);
}

#[test]
fn open_failure_leaves_decisions_flowing() {
    let log = LinkLog::default();
    let mut opener = FakeOpener::new(&log);
    opener.fail_open = true;
    let commands = Arc::new(CommandSlot::new(5));
    let stop = StopSignal::new();
    let mut handle = TransportWorker::new(Box::new(opener), commands.clone(), stop.clone(), settings())
        .spawn()
        .unwrap();

    let JoinOutcome::Finished(summary) = handle.worker.join_timeout(WAIT) else {
        panic!("transport worker did not exit after open failure");
    };
    assert_eq!(summary.final_state, Some(SessionState::Failed));
    assert!(!stop.is_set());

    let mut engine = DecisionEngine::new(SteeringBands::default(), commands.clone());
    for x in [100.0, 320.0, 600.0, 320.0, 100.0, 600.0] {
        engine.decide(Some(x), 640);
    }
    assert_eq!(commands.len(), 5);
    assert_eq!(engine.displaced(), 1);
    assert_eq!(commands.get(Duration::ZERO), Some(Command::Right));
}

#[test]
fn controller_echoes_are_counted() {
    let log = LinkLog::default();
    let mut opener = FakeOpener::new(&log);
    opener.echoes = vec![b"RX: LEFT\r\n\0\0".to_vec(), b"\0\0".to_vec()];
    let commands = Arc::new(CommandSlot::new(5));
    let stop = StopSignal::new();
    let mut handle = TransportWorker::new(Box::new(opener), commands, stop.clone(), settings())
        .spawn()
        .unwrap();

    std::thread::sleep(Duration::from_millis(100));
    stop.trigger();
    let JoinOutcome::Finished(summary) = handle.worker.join_timeout(WAIT) else {
        panic!("transport worker did not finish");
    };
    assert_eq!(summary.echoes, 1);
}

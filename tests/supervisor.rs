mod common;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use common::{wait_for, FakeLauncher, FakeOpener, LinkLog, ProcessLog};
use line_follower::ingest::DemuxExit;
use line_follower::transport::{LinkOpener, SessionState, TransportSettings};
use line_follower::{
    CameraStop, ColorRange, CpuVision, DecisionEngine, DecisionLoop, JpegDecoder, LineDetector,
    LoopExit, LoopSettings, ShutdownReport, StartOptions, StopSignal, SteeringBands, Supervisor,
    Timeouts,
};

const WAIT: Duration = Duration::from_secs(2);

fn jpeg_with_line_on_right() -> Vec<u8> {
    let img = RgbImage::from_fn(640, 480, |x, _| {
        if (500..540).contains(&x) {
            Rgb([10, 10, 10])
        } else {
            Rgb([240, 240, 240])
        }
    });
    let mut out = Vec::new();
    JpegEncoder::new(&mut out).encode_image(&img).unwrap();
    out
}

fn quick_timeouts() -> Timeouts {
    Timeouts {
        camera_warmup: Duration::from_millis(10),
        demuxer_join: Duration::from_secs(1),
        transport_join: Duration::from_secs(1),
        camera_terminate: Duration::from_millis(100),
    }
}

fn options(launcher: FakeLauncher, link: Option<Box<dyn LinkOpener>>) -> StartOptions {
    StartOptions {
        launcher: Box::new(launcher),
        decoder: Box::new(JpegDecoder::new()),
        link,
        transport: TransportSettings {
            command_poll: Duration::from_millis(10),
            echo: false,
        },
        frame_capacity: 2,
        command_capacity: 5,
        timeouts: quick_timeouts(),
    }
}

#[test]
fn runs_camera_to_controller_and_shuts_down_in_order() {
    let process_log = ProcessLog::default();
    let link_log = LinkLog::default();
    let launcher = FakeLauncher::new(jpeg_with_line_on_right(), &process_log);
    let stop = StopSignal::new();

    let mut supervisor = Supervisor::start(
        options(launcher, Some(Box::new(FakeOpener::new(&link_log)))),
        stop.clone(),
    )
    .expect("start");

    let summary = DecisionLoop::new(
        supervisor.frames(),
        LineDetector::new(Box::new(CpuVision::new()), ColorRange::dark_line()),
        DecisionEngine::new(SteeringBands::default(), supervisor.commands()),
        stop.clone(),
        LoopSettings {
            frame_wait: Duration::from_millis(200),
            max_missed_frames: 2,
            miss_backoff: Duration::from_millis(1),
            frame_pause: Duration::ZERO,
        },
    )
    .run();
    assert_eq!(summary.exit, LoopExit::FramesStalled);
    assert_eq!(summary.frames, 1);

    assert!(wait_for(WAIT, || link_log.lines() == vec!["RIGHT\n".to_string()]));
    assert_eq!(supervisor.session_state(), Some(SessionState::Open));

    let report = supervisor.shutdown();
    assert!(stop.is_set());
    assert!(report.overran.is_empty());
    let demuxer = report.demuxer.expect("demuxer summary");
    assert_eq!(demuxer.exit, DemuxExit::Stopped);
    assert_eq!(demuxer.frames_decoded, 1);
    let transport = report.transport.expect("transport summary");
    assert_eq!(transport.sent, 1);
    assert_eq!(transport.final_state, Some(SessionState::Closed));
    assert_eq!(report.camera, Some(CameraStop::Terminated));
    assert!(!report.session_left_open);
    assert_eq!(process_log.terminate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(process_log.kill_calls.load(Ordering::SeqCst), 0);

    // Idempotent: nothing left to do.
    assert_eq!(supervisor.shutdown(), ShutdownReport::default());
    assert_eq!(process_log.terminate_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn camera_ignoring_terminate_is_killed_within_grace() {
    let process_log = ProcessLog::default();
    let mut launcher = FakeLauncher::new(Vec::new(), &process_log);
    launcher.ignore_terminate = true;

    let mut supervisor = Supervisor::start(options(launcher, None), StopSignal::new()).unwrap();
    assert_eq!(supervisor.session_state(), None);

    let started = Instant::now();
    let report = supervisor.shutdown();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.camera, Some(CameraStop::Killed));
    assert!(report.transport.is_none());
    assert_eq!(process_log.terminate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(process_log.kill_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn camera_launch_failure_is_fatal() {
    let process_log = ProcessLog::default();
    let link_log = LinkLog::default();
    let mut launcher = FakeLauncher::new(Vec::new(), &process_log);
    launcher.fail = true;

    let result = Supervisor::start(
        options(launcher, Some(Box::new(FakeOpener::new(&link_log)))),
        StopSignal::new(),
    );
    let err = result.err().expect("start must fail");
    assert!(format!("{:#}", err).contains("camera program not found"));
    assert_eq!(link_log.opened(), 0);
}

#[test]
fn camera_without_output_stream_is_killed_and_fatal() {
    let process_log = ProcessLog::default();
    let mut launcher = FakeLauncher::new(Vec::new(), &process_log);
    launcher.no_stream = true;

    let err = Supervisor::start(options(launcher, None), StopSignal::new())
        .err()
        .expect("start must fail");
    assert!(format!("{:#}", err).contains("no output stream"));
    assert_eq!(process_log.kill_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_during_warm_up_skips_transport() {
    let process_log = ProcessLog::default();
    let link_log = LinkLog::default();
    let launcher = FakeLauncher::new(Vec::new(), &process_log);
    let stop = StopSignal::new();
    stop.trigger();

    let mut opts = options(launcher, Some(Box::new(FakeOpener::new(&link_log))));
    opts.timeouts.camera_warmup = Duration::from_secs(10);
    let started = Instant::now();
    let mut supervisor = Supervisor::start(opts, stop).unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(supervisor.session_state(), None);

    let report = supervisor.shutdown();
    assert!(report.transport.is_none());
    assert_eq!(report.camera, Some(CameraStop::Terminated));
    assert_eq!(link_log.opened(), 0);
}

#[test]
fn link_failure_does_not_stop_vision() {
    let process_log = ProcessLog::default();
    let link_log = LinkLog::default();
    let mut opener = FakeOpener::new(&link_log);
    opener.fail_open = true;
    let launcher = FakeLauncher::new(jpeg_with_line_on_right(), &process_log);
    let stop = StopSignal::new();

    let mut supervisor =
        Supervisor::start(options(launcher, Some(Box::new(opener))), stop.clone()).unwrap();

    assert!(wait_for(WAIT, || {
        supervisor.session_state() == Some(SessionState::Failed)
    }));
    assert!(!stop.is_set());
    let frames = supervisor.frames();
    assert!(frames.get(WAIT).is_some());

    let report = supervisor.shutdown();
    assert_eq!(
        report.transport.and_then(|t| t.final_state),
        Some(SessionState::Failed)
    );
    assert_eq!(report.camera, Some(CameraStop::Terminated));
}

#[test]
fn stuck_transport_is_reported_and_camera_still_stopped() {
    let process_log = ProcessLog::default();
    let link_log = LinkLog::default();
    let mut opener = FakeOpener::new(&link_log);
    opener.open_delay = Duration::from_millis(1500);
    let launcher = FakeLauncher::new(Vec::new(), &process_log);

    let mut opts = options(launcher, Some(Box::new(opener)));
    opts.timeouts.transport_join = Duration::from_millis(50);
    let mut supervisor = Supervisor::start(opts, StopSignal::new()).unwrap();

    let report = supervisor.shutdown();
    assert_eq!(report.overran, vec!["transport".to_string()]);
    assert!(report.transport.is_none());
    assert_eq!(report.camera, Some(CameraStop::Terminated));
}

#[test]
fn dropping_supervisor_runs_shutdown() {
    let process_log = ProcessLog::default();
    let launcher = FakeLauncher::new(Vec::new(), &process_log);
    let supervisor = Supervisor::start(options(launcher, None), StopSignal::new()).unwrap();
    let stop = supervisor.stop_signal();

    drop(supervisor);
    assert!(stop.is_set());
    assert_eq!(process_log.terminate_calls.load(Ordering::SeqCst), 1);
}

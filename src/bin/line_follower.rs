//! line_follower - camera-driven line following robot
//!
//! This daemon:
//! 1. Starts the camera process and demuxes its MJPEG output
//! 2. Finds the dark line in the newest frame and picks a steering command
//! 3. Sends commands to the robot controller over serial
//! 4. On quit, Ctrl-C or a stalled camera, tears everything down in order

use anyhow::Result;
use clap::Parser;
use std::io::{self, BufRead};
use std::path::PathBuf;

use line_follower::config::FollowerConfig;
use line_follower::transport::{discover_port, LinkOpener, SerialOpener};
use line_follower::{
    CameraLauncher, CpuVision, DecisionEngine, DecisionLoop, JpegDecoder, LineDetector, LoopExit,
    SnapshotSink, StartOptions, StopSignal, Supervisor,
};

const ESC: char = '\u{1b}';

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Follow a dark line with a camera and steer a robot controller over serial"
)]
struct Args {
    /// Config file (JSON, or TOML when the name ends in .toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Controller serial port; skips port discovery.
    #[arg(long)]
    serial_port: Option<String>,

    /// Run vision only, without opening the controller link.
    #[arg(long)]
    no_serial: bool,

    /// Write debug overlays into this directory.
    #[arg(long)]
    debug_dir: Option<PathBuf>,

    /// Write a debug overlay every N frames.
    #[arg(long)]
    debug_every: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => FollowerConfig::load_from(path)?,
        None => FollowerConfig::load()?,
    };
    if let Some(port) = args.serial_port {
        cfg.serial.port = Some(port);
    }
    if args.no_serial {
        cfg.serial.enabled = false;
    }
    if let Some(dir) = args.debug_dir {
        cfg.debug.dir = Some(dir);
    }
    if let Some(every) = args.debug_every {
        cfg.debug.every = every;
    }

    log::info!("starting line follower");
    log::info!(
        "camera: {} {}x{} @ {} fps",
        cfg.camera.program,
        cfg.camera.width,
        cfg.camera.height,
        cfg.camera.framerate
    );

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        log::info!("interrupt received, stopping");
        handler_stop.trigger();
    })
    .expect("error setting Ctrl-C handler");
    spawn_quit_watcher(stop.clone());

    let link = resolve_link(&cfg);
    let options = StartOptions {
        launcher: Box::new(CameraLauncher::new(cfg.camera.clone())),
        decoder: Box::new(JpegDecoder::new()),
        link,
        transport: cfg.transport_settings(),
        frame_capacity: cfg.frame_capacity,
        command_capacity: cfg.command_capacity,
        timeouts: cfg.timeouts,
    };
    let mut supervisor = Supervisor::start(options, stop.clone())?;

    let detector = LineDetector::new(Box::new(CpuVision::new()), cfg.color_range);
    let engine = DecisionEngine::new(cfg.bands, supervisor.commands());
    let mut decision_loop = DecisionLoop::new(
        supervisor.frames(),
        detector,
        engine,
        stop,
        cfg.loop_settings,
    );
    if let Some(dir) = &cfg.debug.dir {
        match SnapshotSink::new(dir, cfg.debug.every) {
            Ok(sink) => {
                log::info!("debug snapshots -> {}", sink.dir().display());
                decision_loop = decision_loop.with_debug(Box::new(sink));
            }
            Err(err) => log::warn!("debug output disabled: {:#}", err),
        }
    }
    log::info!("press 'q' then Enter to quit");

    let summary = decision_loop.run();
    match summary.exit {
        LoopExit::Stopped => log::info!("stop requested"),
        LoopExit::Quit => log::info!("quit requested"),
        LoopExit::FramesStalled => log::error!("camera stopped delivering frames"),
    }
    log::info!(
        "processed {} frames, last command {:?}",
        summary.frames,
        summary.last_command
    );

    let report = supervisor.shutdown();
    if !report.overran.is_empty() {
        log::warn!("workers still running at exit: {}", report.overran.join(", "));
    }
    if let Some(camera) = report.camera {
        log::info!("camera: {:?}", camera);
    }
    if let Some(transport) = report.transport {
        log::info!(
            "transport: sent={} timeouts={} echoes={}",
            transport.sent,
            transport.timeouts,
            transport.echoes
        );
    }
    log::info!("exiting");
    Ok(())
}

fn resolve_link(cfg: &FollowerConfig) -> Option<Box<dyn LinkOpener>> {
    if !cfg.serial.enabled {
        log::info!("serial disabled");
        return None;
    }
    let port = match &cfg.serial.port {
        Some(port) => port.clone(),
        None => match discover_port() {
            Ok(Some(port)) => port,
            Ok(None) => {
                log::warn!("pass --serial-port to choose one of the ports listed above");
                return None;
            }
            Err(err) => {
                log::warn!("serial port discovery failed: {:#}", err);
                return None;
            }
        },
    };
    Some(Box::new(SerialOpener::new(cfg.serial_config(&port))))
}

/// Raise the stop signal when stdin delivers `q` or ESC. EOF is ignored so
/// the daemon keeps running with a detached stdin.
fn spawn_quit_watcher(stop: StopSignal) {
    let spawned = std::thread::Builder::new()
        .name("quit-watcher".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    return;
                };
                let key = line.trim();
                if key.eq_ignore_ascii_case("q") || key.contains(ESC) {
                    log::info!("quit key pressed");
                    stop.trigger();
                    return;
                }
            }
        });
    if let Err(err) = spawned {
        log::warn!("quit key disabled: {}", err);
    }
}

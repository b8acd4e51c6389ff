//! Worker lifecycle and shutdown.
//!
//! Three workers run concurrently: the demuxer, the transport worker and
//! the decision loop (on the caller's thread). They share one cooperative
//! `StopSignal`; nothing is preempted. The `Supervisor` owns the camera
//! process and the worker handles, and tears everything down in a fixed
//! order with bounded waits:
//!
//! 1. raise the stop signal
//! 2. join the demuxer (warn if it overruns)
//! 3. join the transport worker (warn if it overruns)
//! 4. terminate the camera, killing it if it ignores the request
//! 5. report the transport session if it is still held
//!
//! Shutdown is idempotent. Worker errors never propagate out of it.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::frame::{FrameDecoder, FrameSlot};
use crate::ingest::{DemuxSummary, StreamDemuxer, VideoLauncher, VideoProcess};
use crate::steer::CommandSlot;
use crate::transport::{
    LinkOpener, SessionMonitor, SessionState, TransportHandle, TransportSettings,
    TransportSummary, TransportWorker,
};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);
const WARMUP_SLICE: Duration = Duration::from_millis(50);

// ----------------------------------------------------------------------------
// StopSignal
// ----------------------------------------------------------------------------

/// Shared cooperative stop flag.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// WorkerHandle
// ----------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
pub enum JoinOutcome<T> {
    Finished(T),
    Panicked,
    TimedOut,
    AlreadyJoined,
}

/// Named thread with a bounded join.
pub struct WorkerHandle<T> {
    name: String,
    join: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> WorkerHandle<T> {
    pub fn spawn<F>(name: &str, work: F) -> Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let join = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(work)
            .with_context(|| format!("spawn {} worker", name))?;
        Ok(Self {
            name: name.to_string(),
            join: Some(join),
        })
    }
}

impl<T> WorkerHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Join, giving up after `timeout`. A worker that overruns is detached.
    pub fn join_timeout(&mut self, timeout: Duration) -> JoinOutcome<T> {
        let Some(join) = self.join.take() else {
            return JoinOutcome::AlreadyJoined;
        };
        let deadline = Instant::now() + timeout;
        while !join.is_finished() {
            if Instant::now() >= deadline {
                return JoinOutcome::TimedOut;
            }
            std::thread::sleep(JOIN_POLL_INTERVAL);
        }
        match join.join() {
            Ok(value) => JoinOutcome::Finished(value),
            Err(_) => JoinOutcome::Panicked,
        }
    }
}

// ----------------------------------------------------------------------------
// Supervisor
// ----------------------------------------------------------------------------

/// Bounded waits used during startup and shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// Pause after starting the camera before frames are expected.
    pub camera_warmup: Duration,
    pub demuxer_join: Duration,
    pub transport_join: Duration,
    /// Grace period between terminate and kill for the camera.
    pub camera_terminate: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            camera_warmup: Duration::from_secs(3),
            demuxer_join: Duration::from_secs(2),
            transport_join: Duration::from_secs(5),
            camera_terminate: Duration::from_secs(5),
        }
    }
}

/// How the camera process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraStop {
    AlreadyExited,
    Terminated,
    Killed,
    /// Kill was issued but could not be confirmed.
    Unconfirmed,
}

/// What a shutdown pass did. Empty on repeated calls.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub demuxer: Option<DemuxSummary>,
    pub transport: Option<TransportSummary>,
    /// Workers that did not finish within their bounded wait.
    pub overran: Vec<String>,
    pub camera: Option<CameraStop>,
    /// True when the transport session was still open after the join.
    pub session_left_open: bool,
}

/// Ingredients for `Supervisor::start`.
pub struct StartOptions {
    pub launcher: Box<dyn VideoLauncher>,
    pub decoder: Box<dyn FrameDecoder>,
    /// `None` skips the transport worker; vision runs without actuation.
    pub link: Option<Box<dyn LinkOpener>>,
    pub transport: TransportSettings,
    pub frame_capacity: usize,
    pub command_capacity: usize,
    pub timeouts: Timeouts,
}

/// Owns the camera process and worker handles for one run.
pub struct Supervisor {
    stop: StopSignal,
    frames: Arc<FrameSlot>,
    commands: Arc<CommandSlot>,
    camera: Option<Box<dyn VideoProcess>>,
    demuxer: Option<WorkerHandle<DemuxSummary>>,
    transport: Option<WorkerHandle<TransportSummary>>,
    session: Option<SessionMonitor>,
    timeouts: Timeouts,
    shut_down: bool,
}

impl Supervisor {
    /// Start the camera, the demuxer and (optionally) the transport worker.
    ///
    /// A camera that cannot be launched is fatal: nothing else is started.
    /// A missing or failing link only disables actuation.
    pub fn start(options: StartOptions, stop: StopSignal) -> Result<Self> {
        let frames = Arc::new(FrameSlot::new(options.frame_capacity));
        let commands = Arc::new(CommandSlot::new(options.command_capacity));

        let mut camera = options
            .launcher
            .launch()
            .context("video source failed to start")?;
        let stream = match camera.take_stream() {
            Some(stream) => stream,
            None => {
                if let Err(err) = camera.kill() {
                    log::warn!("camera kill failed: {:#}", err);
                }
                return Err(anyhow!("video source {} has no output stream", camera.describe()));
            }
        };
        log::info!("camera started: {}", camera.describe());

        let mut supervisor = Self {
            stop: stop.clone(),
            frames: frames.clone(),
            commands: commands.clone(),
            camera: Some(camera),
            demuxer: None,
            transport: None,
            session: None,
            timeouts: options.timeouts,
            shut_down: false,
        };

        let probe = supervisor
            .camera
            .as_ref()
            .map(|camera| camera.probe())
            .ok_or_else(|| anyhow!("camera missing"))?;
        let demuxer = StreamDemuxer::new(stream, options.decoder, frames, stop.clone(), probe);
        match WorkerHandle::spawn("demuxer", move || demuxer.run()) {
            Ok(handle) => supervisor.demuxer = Some(handle),
            Err(err) => {
                supervisor.shutdown();
                return Err(err);
            }
        }

        if !warm_up(&stop, options.timeouts.camera_warmup) {
            log::info!("stop requested during camera warm-up; transport not started");
            return Ok(supervisor);
        }

        match options.link {
            Some(opener) => {
                let worker = TransportWorker::new(opener, commands, stop, options.transport);
                match worker.spawn() {
                    Ok(TransportHandle { worker, session }) => {
                        supervisor.transport = Some(worker);
                        supervisor.session = Some(session);
                        log::info!("transport worker started");
                    }
                    Err(err) => log::error!("transport worker not started: {:#}", err),
                }
            }
            None => log::warn!("no controller port; running without actuation"),
        }

        Ok(supervisor)
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn frames(&self) -> Arc<FrameSlot> {
        self.frames.clone()
    }

    pub fn commands(&self) -> Arc<CommandSlot> {
        self.commands.clone()
    }

    pub fn session_state(&self) -> Option<SessionState> {
        self.session.as_ref().map(|s| s.state())
    }

    /// Stop every worker and the camera. Repeated calls do nothing.
    pub fn shutdown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if self.shut_down {
            return report;
        }
        self.shut_down = true;
        log::info!("cleaning up...");
        self.stop.trigger();

        if let Some(mut demuxer) = self.demuxer.take() {
            log::info!("waiting for demuxer to finish...");
            match demuxer.join_timeout(self.timeouts.demuxer_join) {
                JoinOutcome::Finished(summary) => report.demuxer = Some(summary),
                JoinOutcome::TimedOut => {
                    log::warn!("demuxer did not terminate gracefully");
                    report.overran.push(demuxer.name().to_string());
                }
                JoinOutcome::Panicked => log::error!("demuxer panicked"),
                JoinOutcome::AlreadyJoined => {}
            }
        }

        if let Some(mut transport) = self.transport.take() {
            log::info!("waiting for transport worker to finish...");
            match transport.join_timeout(self.timeouts.transport_join) {
                JoinOutcome::Finished(summary) => report.transport = Some(summary),
                JoinOutcome::TimedOut => {
                    log::warn!("transport worker did not terminate gracefully");
                    report.overran.push(transport.name().to_string());
                }
                JoinOutcome::Panicked => log::error!("transport worker panicked"),
                JoinOutcome::AlreadyJoined => {}
            }
        }

        if let Some(mut camera) = self.camera.take() {
            report.camera = Some(stop_camera(camera.as_mut(), self.timeouts.camera_terminate));
        }

        if let Some(session) = self.session.take() {
            // The session belongs to the transport thread; it is released
            // there when (and if) the thread gets to finish.
            if session.state() == SessionState::Open {
                log::warn!("transport session still open; it closes when its worker exits");
                report.session_left_open = true;
            }
        }

        let frames = self.frames.stats();
        let commands = self.commands.stats();
        log::info!(
            "frames evicted={} skipped={}, commands evicted={} skipped={}",
            frames.evicted,
            frames.skipped,
            commands.evicted,
            commands.skipped
        );
        log::info!("cleanup completed");
        report
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sleep for `duration` in short slices. Returns `false` if `stop` was
/// raised before the time was up.
fn warm_up(stop: &StopSignal, duration: Duration) -> bool {
    let deadline = Instant::now().checked_add(duration);
    loop {
        if stop.is_set() {
            return false;
        }
        let remaining = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => WARMUP_SLICE,
        };
        if remaining.is_zero() {
            return true;
        }
        std::thread::sleep(WARMUP_SLICE.min(remaining));
    }
}

/// Terminate the camera, escalating to a kill after `grace`.
pub fn stop_camera(camera: &mut dyn VideoProcess, grace: Duration) -> CameraStop {
    match camera.has_exited() {
        Ok(true) => return CameraStop::AlreadyExited,
        Ok(false) => {}
        Err(err) => log::warn!("could not poll camera: {:#}", err),
    }

    log::info!("terminating camera process {}...", camera.describe());
    if let Err(err) = camera.terminate() {
        log::warn!("camera terminate failed: {:#}", err);
    }

    let deadline = Instant::now() + grace;
    loop {
        match camera.has_exited() {
            Ok(true) => return CameraStop::Terminated,
            Ok(false) => {}
            Err(err) => {
                log::warn!("could not poll camera: {:#}", err);
                break;
            }
        }
        if Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(JOIN_POLL_INTERVAL);
    }

    log::warn!("camera process did not terminate gracefully, killing it");
    match camera.kill() {
        Ok(()) => CameraStop::Killed,
        Err(err) => {
            log::error!("camera kill failed: {:#}", err);
            CameraStop::Unconfirmed
        }
    }
}

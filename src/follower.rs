//! The decision loop: frame in, command out.
//!
//! Runs on the caller's thread. Each iteration waits (bounded) for the
//! newest frame, locates the line, picks a command and offers it to the
//! command slot. It never blocks on the transport side.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::command::Command;
use crate::detect::{LineDetector, LineObservation};
use crate::frame::{Frame, FrameSlot};
use crate::lifecycle::StopSignal;
use crate::steer::{Bounds, DecisionEngine};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Whether the loop should keep going after a debug render.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebugControl {
    Continue,
    Quit,
}

/// Receives every processed frame for display or inspection.
pub trait DebugSink {
    fn show(
        &mut self,
        frame: &Frame,
        observation: &LineObservation,
        command: Command,
        bounds: Bounds,
    ) -> DebugControl;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopSettings {
    /// Bounded wait for each frame.
    pub frame_wait: Duration,
    /// Consecutive empty waits tolerated before giving up.
    pub max_missed_frames: u32,
    /// Pause after an empty wait.
    pub miss_backoff: Duration,
    /// Pause after each processed frame.
    pub frame_pause: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            frame_wait: Duration::from_secs(1),
            max_missed_frames: 30,
            miss_backoff: Duration::from_millis(100),
            frame_pause: Duration::from_millis(10),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    Stopped,
    Quit,
    FramesStalled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopSummary {
    pub exit: LoopExit,
    pub frames: u64,
    pub last_command: Option<Command>,
}

pub struct DecisionLoop {
    frames: Arc<FrameSlot>,
    detector: LineDetector,
    engine: DecisionEngine,
    stop: StopSignal,
    settings: LoopSettings,
    debug: Option<Box<dyn DebugSink>>,
}

impl DecisionLoop {
    pub fn new(
        frames: Arc<FrameSlot>,
        detector: LineDetector,
        engine: DecisionEngine,
        stop: StopSignal,
        settings: LoopSettings,
    ) -> Self {
        Self {
            frames,
            detector,
            engine,
            stop,
            settings,
            debug: None,
        }
    }

    pub fn with_debug(mut self, sink: Box<dyn DebugSink>) -> Self {
        self.debug = Some(sink);
        self
    }

    /// Process one frame. Returns the command and the debug verdict.
    pub fn step(&mut self, frame: &Frame) -> (Command, DebugControl) {
        let observation = self.detector.observe(frame);
        let command = self.engine.decide(observation.centroid_x(), frame.width());
        let control = match self.debug.as_mut() {
            Some(sink) => {
                let bounds = self.engine.bands().bounds(frame.width());
                sink.show(frame, &observation, command, bounds)
            }
            None => DebugControl::Continue,
        };
        (command, control)
    }

    pub fn run(mut self) -> LoopSummary {
        log::info!(
            "starting line detection ({} vision backend)",
            self.detector.backend_name()
        );
        let mut missed = 0u32;
        let mut frames = 0u64;
        let mut last_command = None;
        let mut last_health_log = Instant::now();

        let exit = loop {
            if self.stop.is_set() {
                break LoopExit::Stopped;
            }

            let Some(frame) = self.frames.get(self.settings.frame_wait) else {
                missed += 1;
                if missed > self.settings.max_missed_frames {
                    log::error!("too many failed frame reads ({}), exiting", missed);
                    break LoopExit::FramesStalled;
                }
                std::thread::sleep(self.settings.miss_backoff);
                continue;
            };
            missed = 0;
            frames += 1;

            let (command, control) = self.step(&frame);
            last_command = Some(command);
            if control == DebugControl::Quit {
                log::info!("quit requested from debug view");
                break LoopExit::Quit;
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                log::info!(
                    "decision loop: frames={} last={} displaced_commands={} frame_age={:?}",
                    frames,
                    command,
                    self.engine.displaced(),
                    frame.age()
                );
                last_health_log = Instant::now();
            }

            if !self.settings.frame_pause.is_zero() {
                std::thread::sleep(self.settings.frame_pause);
            }
        };

        LoopSummary {
            exit,
            frames,
            last_command,
        }
    }
}

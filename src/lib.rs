//! Camera-driven line follower.
//!
//! Reads an MJPEG stream from an external camera process, finds a dark line
//! in each frame, turns its horizontal position into a steering command and
//! sends that command to a robot controller over a serial link.
//!
//! # Architecture
//!
//! Three concurrent workers share one cooperative `StopSignal`:
//!
//! 1. **Demuxer**: splits the camera's stdout into JPEG frames and publishes
//!    them to a latest-wins `FrameSlot`.
//! 2. **Decision loop**: takes the newest frame, locates the line and
//!    publishes a command to a latest-wins `CommandSlot`.
//! 3. **Transport**: drains the command slot onto the serial link and logs
//!    whatever the controller echoes back.
//!
//! Freshness beats completeness: both slots drop the oldest entry when full,
//! and readers skip straight to the newest one. A failing controller link
//! never stops vision; a camera that fails to start stops everything.
//!
//! # Module Structure
//!
//! - `command`: the four steering commands and their wire form
//! - `slot`: bounded latest-wins handoff between workers
//! - `frame`: decoded frames and the `FrameDecoder` seam
//! - `ingest`: camera process and MJPEG demuxing
//! - `detect`: vision primitives and the line detector
//! - `steer`: steering bands and the decision engine
//! - `transport`: command link, serial session and transport worker
//! - `follower`: the decision loop and debug sinks
//! - `debug`: overlay rendering and snapshot output
//! - `lifecycle`: stop signal, bounded joins and the `Supervisor`
//! - `config`: file and environment configuration

pub mod command;
pub mod config;
pub mod debug;
pub mod detect;
pub mod follower;
pub mod frame;
pub mod ingest;
pub mod lifecycle;
pub mod slot;
pub mod steer;
pub mod transport;

pub use command::Command;
pub use config::FollowerConfig;
pub use debug::{command_color, render_overlay, SnapshotSink};
pub use detect::{
    Centroid, ColorRange, Contour, CpuVision, LineDetector, LineObservation, VisionBackend,
};
pub use follower::{DebugControl, DebugSink, DecisionLoop, LoopExit, LoopSettings, LoopSummary};
pub use frame::{Frame, FrameDecoder, FrameSlot, JpegDecoder};
pub use ingest::{CameraConfig, CameraLauncher, StreamDemuxer, VideoLauncher, VideoProcess};
pub use lifecycle::{
    stop_camera, CameraStop, ShutdownReport, StartOptions, StopSignal, Supervisor, Timeouts,
    WorkerHandle,
};
pub use slot::{LatestSlot, PutOutcome, SlotStats};
pub use steer::{Bounds, CommandSlot, DecisionEngine, SteeringBands};
pub use transport::{
    CommandLink, LinkOpener, SendOutcome, SerialConfig, SerialOpener, SessionState,
    TransportSettings, TransportWorker,
};

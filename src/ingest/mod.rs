//! Video ingestion.
//!
//! - `camera`: the external camera process and the `VideoProcess` seam
//! - `mjpeg`: marker-based demuxing of the camera's stdout into frames
//!
//! Ingestion is responsible for turning the raw byte pipe into decoded
//! `Frame`s in the `FrameSlot`. It never interprets frame content.

pub mod camera;
pub mod mjpeg;

pub use camera::{CameraConfig, CameraLauncher, CameraProcess, VideoLauncher, VideoProcess};
pub use mjpeg::{
    find_jpeg_bounds, DemuxExit, DemuxSummary, MjpegDemuxer, StreamDemuxer, UpstreamProbe,
};

//! MJPEG stream demuxing.
//!
//! The camera writes back-to-back JPEG images to a pipe with no container
//! and no length prefixes. `MjpegDemuxer` accumulates bytes and cuts out
//! each `FF D8 .. FF D9` span; `StreamDemuxer` is the worker that reads
//! the pipe, decodes every span and hands frames to the `FrameSlot`.
//!
//! The demuxer MUST NOT:
//! - Stop on a single undecodable frame
//! - Block on a full frame slot
//! - Busy-spin on empty reads

use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::frame::{FrameDecoder, FrameSlot};
use crate::lifecycle::StopSignal;
use crate::slot::PutOutcome;

/// JPEG start-of-image marker.
pub const JPEG_START: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker.
pub const JPEG_END: [u8; 2] = [0xFF, 0xD9];

/// Bytes requested per read from the camera pipe.
pub const READ_CHUNK_BYTES: usize = 4096;

/// Pending bytes tolerated without a complete frame before resyncing.
pub const MAX_PENDING_BYTES: usize = 8 * 1024 * 1024;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Reports whether the upstream producer can still deliver bytes.
pub type UpstreamProbe = Box<dyn Fn() -> bool + Send>;

// ----------------------------------------------------------------------------
// MjpegDemuxer: marker scanning over a byte buffer
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MjpegDemuxer {
    buffer: Vec<u8>,
    extracted: u64,
    resynced_bytes: u64,
}

impl MjpegDemuxer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64 * 1024),
            extracted: 0,
            resynced_bytes: 0,
        }
    }

    /// Append freshly read stream bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Cut the next complete JPEG out of the buffer.
    ///
    /// Everything up to and including the end marker is removed, so bytes
    /// preceding the start marker are dropped with it. Returns `None` when
    /// either marker is missing; the partial data stays pending.
    pub fn next_jpeg(&mut self) -> Option<Vec<u8>> {
        let Some((start, end)) = find_jpeg_bounds(&self.buffer) else {
            self.enforce_pending_limit();
            return None;
        };
        let jpeg = self.buffer[start..end].to_vec();
        self.buffer.drain(..end);
        self.extracted += 1;
        Some(jpeg)
    }

    /// Bytes awaiting a complete frame.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn frames_extracted(&self) -> u64 {
        self.extracted
    }

    pub fn resynced_bytes(&self) -> u64 {
        self.resynced_bytes
    }

    fn enforce_pending_limit(&mut self) {
        if self.buffer.len() <= MAX_PENDING_BYTES {
            return;
        }
        // Keep the last byte: it may be the first half of a marker.
        let drain_len = self.buffer.len() - 1;
        self.buffer.drain(..drain_len);
        self.resynced_bytes += drain_len as u64;
        log::warn!(
            "demuxer: {} bytes without a complete frame, discarded to resync",
            drain_len
        );
    }
}

/// Locate `[start, end)` of the first complete JPEG, `end` just past `FF D9`.
pub fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = find_marker(buffer, JPEG_START, 0)?;
    let end = find_marker(buffer, JPEG_END, start + JPEG_START.len())?;
    Some((start, end + JPEG_END.len()))
}

fn find_marker(buffer: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    if from >= buffer.len() {
        return None;
    }
    buffer[from..]
        .windows(2)
        .position(|pair| pair == marker)
        .map(|offset| from + offset)
}

// ----------------------------------------------------------------------------
// StreamDemuxer: the demuxing worker
// ----------------------------------------------------------------------------

/// Why the demuxer loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DemuxExit {
    /// The shared stop signal was raised.
    Stopped,
    /// The upstream process exited and the stream was drained.
    UpstreamEnded,
    /// The stream returned an unrecoverable read error.
    ReadFailed,
}

/// Totals reported when the worker returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DemuxSummary {
    pub exit: DemuxExit,
    pub bytes_read: u64,
    pub frames_decoded: u64,
    pub decode_failures: u64,
    pub frames_evicted: u64,
}

pub struct StreamDemuxer {
    reader: Box<dyn Read + Send>,
    decoder: Box<dyn FrameDecoder>,
    slot: Arc<FrameSlot>,
    stop: StopSignal,
    upstream: UpstreamProbe,
    demuxer: MjpegDemuxer,
    idle_backoff: Duration,
    bytes_read: u64,
    frames_decoded: u64,
    decode_failures: u64,
    frames_evicted: u64,
}

impl StreamDemuxer {
    pub fn new(
        reader: Box<dyn Read + Send>,
        decoder: Box<dyn FrameDecoder>,
        slot: Arc<FrameSlot>,
        stop: StopSignal,
        upstream: UpstreamProbe,
    ) -> Self {
        Self {
            reader,
            decoder,
            slot,
            stop,
            upstream,
            demuxer: MjpegDemuxer::new(),
            idle_backoff: Duration::from_millis(10),
            bytes_read: 0,
            frames_decoded: 0,
            decode_failures: 0,
            frames_evicted: 0,
        }
    }

    /// Pause after a read that produced no bytes.
    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }

    /// Run until stopped, the upstream ends, or the pipe fails.
    pub fn run(mut self) -> DemuxSummary {
        log::info!("demuxer: started ({} decoder)", self.decoder.name());
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        let mut last_health_log = Instant::now();

        let exit = loop {
            if self.stop.is_set() {
                break DemuxExit::Stopped;
            }

            match self.reader.read(&mut chunk) {
                Ok(0) => {
                    if !(self.upstream)() {
                        break DemuxExit::UpstreamEnded;
                    }
                    std::thread::sleep(self.idle_backoff);
                    continue;
                }
                Ok(read) => {
                    self.bytes_read += read as u64;
                    self.process_chunk(&chunk[..read]);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    std::thread::sleep(self.idle_backoff);
                    continue;
                }
                Err(err) => {
                    if !self.stop.is_set() {
                        log::error!("demuxer: stream read failed: {}", err);
                    }
                    break DemuxExit::ReadFailed;
                }
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                log::info!(
                    "demuxer: frames={} decode_failures={} evicted={} pending_bytes={}",
                    self.frames_decoded,
                    self.decode_failures,
                    self.frames_evicted,
                    self.demuxer.pending().len()
                );
                last_health_log = Instant::now();
            }
        };

        let summary = self.summary(exit);
        log::info!(
            "demuxer: stopped ({:?}) after {} frames",
            summary.exit,
            summary.frames_decoded
        );
        summary
    }

    /// Append one read's worth of bytes and publish every frame it completes.
    ///
    /// Returns the number of frames published.
    pub fn process_chunk(&mut self, bytes: &[u8]) -> usize {
        self.demuxer.push(bytes);
        let mut published = 0;
        while let Some(jpeg) = self.demuxer.next_jpeg() {
            let sequence = self.frames_decoded + self.decode_failures + 1;
            match self.decoder.decode(&jpeg, sequence) {
                Ok(frame) => {
                    self.frames_decoded += 1;
                    published += 1;
                    if self.slot.put(frame) == PutOutcome::Evicted {
                        self.frames_evicted += 1;
                    }
                }
                Err(err) => {
                    self.decode_failures += 1;
                    log::warn!(
                        "demuxer: discarded {} byte frame candidate: {:#}",
                        jpeg.len(),
                        err
                    );
                }
            }
        }
        published
    }

    /// Bytes still waiting for a complete frame.
    pub fn pending(&self) -> &[u8] {
        self.demuxer.pending()
    }

    fn summary(&self, exit: DemuxExit) -> DemuxSummary {
        DemuxSummary {
            exit,
            bytes_read: self.bytes_read,
            frames_decoded: self.frames_decoded,
            decode_failures: self.decode_failures,
            frames_evicted: self.frames_evicted,
        }
    }
}

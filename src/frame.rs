//! Decoded frames and the frame handoff slot.
//!
//! - `Frame`: an owned RGB raster produced by the demuxer. Not `Clone`; it
//!   moves from the demuxer into the `FrameSlot` and then to exactly one
//!   consumer.
//! - `FrameDecoder`: capability that turns one compressed image into a
//!   `Frame`. `JpegDecoder` is the default.
//! - `FrameSlot`: latest-wins slot carrying frames (capacity 2).

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::time::{Duration, Instant};

use crate::slot::LatestSlot;

/// Latest-wins handoff from the demuxer to the decision loop.
pub type FrameSlot = LatestSlot<Frame>;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// A decoded raster image. Arrival order stands in for a timestamp.
pub struct Frame {
    image: RgbImage,
    /// Position in the decoded stream, starting at 1.
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Time since the frame was decoded.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Decoding
// ----------------------------------------------------------------------------

/// Turns one compressed image into a raster.
///
/// Implementations return an error for malformed input; the demuxer logs
/// it and keeps going.
pub trait FrameDecoder: Send {
    fn name(&self) -> &'static str;

    fn decode(&mut self, bytes: &[u8], sequence: u64) -> Result<Frame>;
}

/// JPEG decoder backed by the `image` crate.
#[derive(Default)]
pub struct JpegDecoder;

impl JpegDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl FrameDecoder for JpegDecoder {
    fn name(&self) -> &'static str {
        "jpeg"
    }

    fn decode(&mut self, bytes: &[u8], sequence: u64) -> Result<Frame> {
        let decoded = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
            .context("decode jpeg")?;
        let rgb = decoded.into_rgb8();
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(anyhow!("decoded jpeg has no pixels"));
        }
        Ok(Frame::new(rgb, sequence))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::Rgb;

    fn encode_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 200, 200]));
        let mut out = Vec::new();
        JpegEncoder::new(&mut out).encode_image(&img).unwrap();
        out
    }

    #[test]
    fn jpeg_decoder_produces_frame_with_dimensions() {
        let mut decoder = JpegDecoder::new();
        let frame = decoder.decode(&encode_jpeg(32, 24), 7).unwrap();
        assert_eq!(frame.width(), 32);
        assert_eq!(frame.height(), 24);
        assert_eq!(frame.sequence, 7);
    }

    #[test]
    fn jpeg_decoder_rejects_truncated_input() {
        let mut decoder = JpegDecoder::new();
        assert!(decoder.decode(&[0xFF, 0xD8, 0xFF, 0xD9], 1).is_err());
    }

    #[test]
    fn frame_slot_hands_over_newest_frame() {
        let slot = FrameSlot::new(2);
        for seq in 1..=3 {
            slot.put(Frame::new(RgbImage::new(4, 4), seq));
        }
        let frame = slot.try_get().unwrap();
        assert_eq!(frame.sequence, 3);
        assert!(slot.try_get().is_none());
    }
}

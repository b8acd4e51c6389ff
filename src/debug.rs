//! Debug overlays.
//!
//! Renders what the decision loop saw: both steering boundaries, the
//! contour it used, the centroid and a badge in the top-left corner whose
//! colour names the command sent for that frame. `SnapshotSink` writes the overlay and
//! the mask to disk every few frames, standing in for a live window on a
//! headless robot.

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};

use crate::command::Command;
use crate::detect::LineObservation;
use crate::follower::{DebugControl, DebugSink};
use crate::frame::Frame;
use crate::steer::Bounds;

const BOUNDARY_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const CONTOUR_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const CENTROID_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const CENTROID_RADIUS: i32 = 5;
const BADGE_SIZE: u32 = 16;
const BADGE_MARGIN: i32 = 4;

/// Badge colour for each command.
pub fn command_color(command: Command) -> Rgb<u8> {
    match command {
        Command::Forward => Rgb([0, 160, 0]),
        Command::Left => Rgb([255, 200, 0]),
        Command::Right => Rgb([200, 0, 255]),
        Command::Stop => Rgb([160, 0, 0]),
    }
}

/// Copy of the frame with boundaries, contour, centroid and command badge
/// drawn on it.
pub fn render_overlay(
    frame: &Frame,
    observation: &LineObservation,
    command: Command,
    bounds: Bounds,
) -> RgbImage {
    let mut canvas = frame.image().clone();
    let height = canvas.height() as f32;

    for x in [bounds.left as f32, bounds.right as f32] {
        draw_line_segment_mut(&mut canvas, (x, 0.0), (x, height), BOUNDARY_COLOR);
        draw_line_segment_mut(&mut canvas, (x + 1.0, 0.0), (x + 1.0, height), BOUNDARY_COLOR);
    }

    if let Some(contour) = &observation.contour {
        for point in &contour.points {
            if point.x >= 0
                && point.y >= 0
                && (point.x as u32) < canvas.width()
                && (point.y as u32) < canvas.height()
            {
                canvas.put_pixel(point.x as u32, point.y as u32, CONTOUR_COLOR);
            }
        }
        if let Some(centroid) = observation.centroid {
            draw_filled_circle_mut(
                &mut canvas,
                (centroid.x, centroid.y),
                CENTROID_RADIUS,
                CENTROID_COLOR,
            );
        }
    }

    draw_filled_rect_mut(
        &mut canvas,
        Rect::at(BADGE_MARGIN, BADGE_MARGIN).of_size(BADGE_SIZE, BADGE_SIZE),
        command_color(command),
    );

    canvas
}

/// Writes `overlay.png` and `mask.png` into a directory every `every` frames.
pub struct SnapshotSink {
    dir: PathBuf,
    every: u64,
    seen: u64,
}

impl SnapshotSink {
    pub fn new(dir: impl Into<PathBuf>, every: u64) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create debug directory {}", dir.display()))?;
        Ok(Self {
            dir,
            every: every.max(1),
            seen: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write(
        &self,
        frame: &Frame,
        observation: &LineObservation,
        command: Command,
        bounds: Bounds,
    ) -> Result<()> {
        let overlay = render_overlay(frame, observation, command, bounds);
        let overlay_path = self.dir.join("overlay.png");
        overlay
            .save(&overlay_path)
            .with_context(|| format!("write {}", overlay_path.display()))?;
        let mask_path = self.dir.join("mask.png");
        observation
            .mask
            .save(&mask_path)
            .with_context(|| format!("write {}", mask_path.display()))?;
        Ok(())
    }
}

impl DebugSink for SnapshotSink {
    fn show(
        &mut self,
        frame: &Frame,
        observation: &LineObservation,
        command: Command,
        bounds: Bounds,
    ) -> DebugControl {
        self.seen += 1;
        if self.seen % self.every != 0 {
            return DebugControl::Continue;
        }
        match self.write(frame, observation, command, bounds) {
            Ok(()) => log::debug!(
                "debug snapshot #{}: action={} cx={:?}",
                frame.sequence,
                command,
                observation.centroid.map(|c| c.x)
            ),
            Err(err) => log::warn!("debug snapshot failed: {:#}", err),
        }
        DebugControl::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Centroid, Contour, Mask, Point};
    use crate::steer::SteeringBands;

    fn observation_with_line() -> LineObservation {
        LineObservation {
            centroid: Some(Centroid { x: 30, y: 20 }),
            contour: Some(Contour::new(vec![
                Point { x: 28, y: 10 },
                Point { x: 32, y: 10 },
                Point { x: 32, y: 30 },
                Point { x: 28, y: 30 },
            ])),
            mask: Mask::new(64, 48),
        }
    }

    #[test]
    fn overlay_marks_boundaries_contour_and_centroid() {
        let frame = Frame::new(RgbImage::new(64, 48), 1);
        let bounds = SteeringBands::default().bounds(64);
        let overlay = render_overlay(&frame, &observation_with_line(), Command::Left, bounds);

        assert_eq!(*overlay.get_pixel(bounds.left as u32, 5), BOUNDARY_COLOR);
        assert_eq!(*overlay.get_pixel(28, 10), CONTOUR_COLOR);
        assert_eq!(*overlay.get_pixel(30, 20), CENTROID_COLOR);
        assert_eq!(*overlay.get_pixel(8, 8), command_color(Command::Left));
        // Source frame untouched.
        assert_eq!(*frame.image().get_pixel(30, 20), Rgb([0, 0, 0]));
        assert_eq!(*frame.image().get_pixel(8, 8), Rgb([0, 0, 0]));
    }

    #[test]
    fn command_badge_follows_the_command() {
        let frame = Frame::new(RgbImage::new(64, 48), 1);
        let bounds = SteeringBands::default().bounds(64);
        let observation = observation_with_line();

        let badges: Vec<Rgb<u8>> = Command::ALL
            .into_iter()
            .map(|command| *render_overlay(&frame, &observation, command, bounds).get_pixel(8, 8))
            .collect();
        for (i, badge) in badges.iter().enumerate() {
            assert!(!badges[i + 1..].contains(badge), "badge colours must differ");
        }
    }

    #[test]
    fn snapshot_sink_writes_every_nth_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SnapshotSink::new(dir.path().join("debug"), 2).unwrap();
        let frame = Frame::new(RgbImage::new(64, 48), 1);
        let bounds = SteeringBands::default().bounds(64);
        let obs = observation_with_line();

        sink.show(&frame, &obs, Command::Forward, bounds);
        assert!(!sink.dir().join("overlay.png").exists());
        let control = sink.show(&frame, &obs, Command::Forward, bounds);
        assert_eq!(control, DebugControl::Continue);
        assert!(sink.dir().join("overlay.png").exists());
        assert!(sink.dir().join("mask.png").exists());
    }
}

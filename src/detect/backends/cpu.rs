use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};

use crate::detect::backend::VisionBackend;
use crate::detect::result::{ColorRange, Contour, Mask, Moments, Point};
use crate::frame::Frame;

/// CPU backend built on `imageproc` border following.
#[derive(Default)]
pub struct CpuVision;

impl CpuVision {
    pub fn new() -> Self {
        Self
    }
}

impl VisionBackend for CpuVision {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn threshold(&self, frame: &Frame, range: &ColorRange) -> Mask {
        let image = frame.image();
        GrayImage::from_fn(image.width(), image.height(), |x, y| {
            if range.contains(image.get_pixel(x, y).0) {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    fn external_contours(&self, mask: &Mask) -> Vec<Contour> {
        find_contours::<i32>(mask)
            .into_iter()
            .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
            .map(|c| {
                Contour::new(
                    c.points
                        .into_iter()
                        .map(|p| Point { x: p.x, y: p.y })
                        .collect(),
                )
            })
            .collect()
    }

    fn moments(&self, contour: &Contour) -> Moments {
        polygon_moments(&contour.points)
    }
}

/// Moments of the polygon through `points` (Green's theorem).
///
/// Orientation is normalised so `m00` is never negative. Fewer than three
/// distinct points enclose nothing and yield all zeros.
pub fn polygon_moments(points: &[Point]) -> Moments {
    if points.len() < 3 {
        return Moments::default();
    }
    let mut m00 = 0.0;
    let mut m10 = 0.0;
    let mut m01 = 0.0;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        let (x0, y0) = (f64::from(p.x), f64::from(p.y));
        let (x1, y1) = (f64::from(q.x), f64::from(q.y));
        let cross = x0 * y1 - x1 * y0;
        m00 += cross;
        m10 += cross * (x0 + x1);
        m01 += cross * (y0 + y1);
    }
    let mut moments = Moments {
        m00: m00 / 2.0,
        m10: m10 / 6.0,
        m01: m01 / 6.0,
    };
    if moments.m00 < 0.0 {
        moments.m00 = -moments.m00;
        moments.m10 = -moments.m10;
        moments.m01 = -moments.m01;
    }
    moments
}

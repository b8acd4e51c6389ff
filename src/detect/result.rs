use image::GrayImage;

/// Binary mask: 255 where a pixel fell inside the colour range, 0 elsewhere.
pub type Mask = GrayImage;

/// Inclusive per-channel RGB range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorRange {
    pub low: [u8; 3],
    pub high: [u8; 3],
}

impl ColorRange {
    pub fn new(low: [u8; 3], high: [u8; 3]) -> Self {
        Self { low, high }
    }

    /// Dark pixels: every channel at most 70.
    pub fn dark_line() -> Self {
        Self::new([0, 0, 0], [70, 70, 70])
    }

    pub fn contains(&self, pixel: [u8; 3]) -> bool {
        (0..3).all(|c| pixel[c] >= self.low[c] && pixel[c] <= self.high[c])
    }
}

impl Default for ColorRange {
    fn default() -> Self {
        Self::dark_line()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Closed boundary of one masked region, in tracing order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Contour {
    pub points: Vec<Point>,
}

impl Contour {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }
}

/// Spatial moments up to first order.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
}

impl Moments {
    /// Enclosed area (the zeroth moment).
    pub fn area(&self) -> f64 {
        self.m00.abs()
    }

    /// Area-weighted centre, truncated to whole pixels.
    ///
    /// `None` when `m00` is zero (degenerate region).
    pub fn centroid(&self) -> Option<Centroid> {
        if self.m00 == 0.0 {
            return None;
        }
        Some(Centroid {
            x: (self.m10 / self.m00) as i32,
            y: (self.m01 / self.m00) as i32,
        })
    }
}

/// Line position in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Centroid {
    pub x: i32,
    pub y: i32,
}

/// What the line detector saw in one frame.
#[derive(Clone, Debug)]
pub struct LineObservation {
    /// Absent when no usable line was found.
    pub centroid: Option<Centroid>,
    /// Largest external contour, when any contour exists.
    pub contour: Option<Contour>,
    pub mask: Mask,
}

impl LineObservation {
    pub fn centroid_x(&self) -> Option<f64> {
        self.centroid.map(|c| f64::from(c.x))
    }
}

use crate::detect::result::{ColorRange, Contour, Mask, Moments};
use crate::frame::Frame;

/// Vision primitives the line detector is built on.
///
/// Backends supply the image classification; the detector only decides
/// how their outputs are combined. Swapping the backend (or faking it in
/// tests) leaves the detection logic untouched.
pub trait VisionBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Mark pixels that fall inside `range`.
    fn threshold(&self, frame: &Frame, range: &ColorRange) -> Mask;

    /// Outer boundaries of the masked regions, holes and nested regions
    /// excluded.
    fn external_contours(&self, mask: &Mask) -> Vec<Contour>;

    /// Polygon moments of a contour.
    fn moments(&self, contour: &Contour) -> Moments;
}

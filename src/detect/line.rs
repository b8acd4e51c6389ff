use crate::detect::backend::VisionBackend;
use crate::detect::result::{ColorRange, Contour, LineObservation, Moments};
use crate::frame::Frame;

/// Locates the line in a frame.
///
/// Masks the colour range, takes the external contour with the largest
/// area (first one wins on ties) and reports its centroid. Interpreting
/// the centroid is left to the steering policy.
pub struct LineDetector {
    backend: Box<dyn VisionBackend>,
    range: ColorRange,
}

impl LineDetector {
    pub fn new(backend: Box<dyn VisionBackend>, range: ColorRange) -> Self {
        Self { backend, range }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn range(&self) -> ColorRange {
        self.range
    }

    pub fn observe(&self, frame: &Frame) -> LineObservation {
        let mask = self.backend.threshold(frame, &self.range);
        let contours = self.backend.external_contours(&mask);

        let Some((contour, moments)) = self.largest(contours) else {
            return LineObservation {
                centroid: None,
                contour: None,
                mask,
            };
        };

        LineObservation {
            centroid: moments.centroid(),
            contour: Some(contour),
            mask,
        }
    }

    fn largest(&self, contours: Vec<Contour>) -> Option<(Contour, Moments)> {
        let mut best: Option<(Contour, Moments)> = None;
        for contour in contours {
            let moments = self.backend.moments(&contour);
            let replace = match &best {
                Some((_, current)) => moments.area() > current.area(),
                None => true,
            };
            if replace {
                best = Some((contour, moments));
            }
        }
        best
    }
}

mod backend;
mod backends;
mod line;
mod result;

pub use backend::VisionBackend;
pub use backends::{cpu::polygon_moments, CpuVision};
pub use line::LineDetector;
pub use result::{Centroid, ColorRange, Contour, LineObservation, Mask, Moments, Point};

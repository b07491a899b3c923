pub mod calibrator;
pub mod ear;
pub mod smoother;

pub use calibrator::Calibrator;
pub use ear::{eye_aspect_ratio, face_bounds, EyeLandmarks, FaceBounds, LandmarkError, Point};
pub use smoother::Smoother;

pub mod capture;
pub mod controller;
pub mod loop_worker;

pub use capture::{Capture, CaptureRig, Embedder, Frame, FrameSource, LandmarkProvider};
pub use controller::SensingController;
pub use loop_worker::{ActiveSession, LoopContext, SharedRig};

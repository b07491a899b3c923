use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use image::RgbImage;

use crate::signal::Point;

#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
        }
    }
}

/// Camera or any other producer of frames.
pub trait FrameSource: Send {
    fn capture(&mut self) -> Result<Frame>;
}

/// Face landmark model. Coordinates are normalized to [0, 1] by frame size;
/// `None` when no face is found.
pub trait LandmarkProvider: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Option<Vec<Point>>>;
}

/// Face embedding model, opaque beyond its fixed output length.
pub trait Embedder: Send {
    fn embed(&mut self, face: &RgbImage) -> Result<Vec<f32>>;
}

/// One captured frame with whatever landmarks were found in it.
#[derive(Debug, Clone)]
pub struct Capture {
    pub frame: Frame,
    pub landmarks: Option<Vec<Point>>,
}

/// The frame source and landmark provider, always driven together.
pub struct CaptureRig {
    source: Box<dyn FrameSource>,
    landmarks: Box<dyn LandmarkProvider>,
}

impl CaptureRig {
    pub fn new(source: Box<dyn FrameSource>, landmarks: Box<dyn LandmarkProvider>) -> Self {
        Self { source, landmarks }
    }

    pub fn capture(&mut self) -> Result<Capture> {
        let frame = self.source.capture().context("frame capture failed")?;
        let landmarks = self
            .landmarks
            .detect(&frame)
            .context("landmark detection failed")?;
        Ok(Capture { frame, landmarks })
    }
}

//! Eye-aspect-ratio geometry over face-mesh landmarks.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mesh indices of the six left-eye points: outer corner, two upper lids,
/// inner corner, two lower lids.
pub const LEFT_EYE: [usize; 6] = [362, 385, 387, 263, 373, 380];
pub const RIGHT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];

const MIN_HORIZONTAL_SPAN: f64 = 1e-6;

/// Landmark coordinate normalized by frame size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LandmarkError {
    #[error("landmark set has {actual} points, eye indices need at least {required}")]
    TooFewPoints { required: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeLandmarks {
    pub left: [Point; 6],
    pub right: [Point; 6],
}

impl EyeLandmarks {
    /// Pick both six-point eye subsets out of a full face mesh.
    pub fn from_mesh(points: &[Point]) -> Result<Self, LandmarkError> {
        let required = LEFT_EYE
            .iter()
            .chain(RIGHT_EYE.iter())
            .max()
            .map(|idx| idx + 1)
            .unwrap_or(0);
        if points.len() < required {
            return Err(LandmarkError::TooFewPoints {
                required,
                actual: points.len(),
            });
        }

        Ok(Self {
            left: LEFT_EYE.map(|idx| points[idx]),
            right: RIGHT_EYE.map(|idx| points[idx]),
        })
    }

    /// Mean EAR of both eyes, `None` if either eye is degenerate.
    pub fn ear(&self) -> Option<f64> {
        let left = eye_aspect_ratio(&self.left)?;
        let right = eye_aspect_ratio(&self.right)?;
        Some((left + right) / 2.0)
    }
}

/// `(|p1-p5| + |p2-p4|) / (2 |p0-p3|)`; `None` on zero horizontal span or NaN.
pub fn eye_aspect_ratio(eye: &[Point; 6]) -> Option<f64> {
    let vertical1 = eye[1].distance(&eye[5]);
    let vertical2 = eye[2].distance(&eye[4]);
    let horizontal = eye[0].distance(&eye[3]);

    if !horizontal.is_finite() || horizontal < MIN_HORIZONTAL_SPAN {
        return None;
    }

    let ear = (vertical1 + vertical2) / (2.0 * horizontal);
    ear.is_finite().then_some(ear)
}

/// Pixel-space face rectangle around all landmarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Bounding box of the landmarks grown by `margin` (fraction of box size),
/// clamped to the frame. `None` when the box collapses.
pub fn face_bounds(points: &[Point], frame_width: u32, frame_height: u32, margin: f32) -> Option<FaceBounds> {
    let finite = points.iter().filter(|p| p.x.is_finite() && p.y.is_finite());
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    let mut any = false;
    for p in finite {
        any = true;
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    if !any {
        return None;
    }

    let pad_x = (max_x - min_x) * margin as f64;
    let pad_y = (max_y - min_y) * margin as f64;
    let w = frame_width as f64;
    let h = frame_height as f64;

    let left = ((min_x - pad_x) * w).clamp(0.0, w).floor();
    let top = ((min_y - pad_y) * h).clamp(0.0, h).floor();
    let right = ((max_x + pad_x) * w).clamp(0.0, w).ceil();
    let bottom = ((max_y + pad_y) * h).clamp(0.0, h).ceil();

    if right - left < 1.0 || bottom - top < 1.0 {
        return None;
    }

    Some(FaceBounds {
        x: left as u32,
        y: top as u32,
        width: (right - left) as u32,
        height: (bottom - top) as u32,
    })
}

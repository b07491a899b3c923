#![allow(dead_code)]

use std::{collections::VecDeque, path::PathBuf};

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use deskwatch::{
    sensing::{Embedder, Frame, FrameSource, LandmarkProvider},
    signal::{
        ear::{LEFT_EYE, RIGHT_EYE},
        Point,
    },
};
use image::{Rgb, RgbImage};
use uuid::Uuid;

pub const FPS: i64 = 30;

/// Tick `i` of a 30 fps stream; every 30 ticks are exactly one second apart.
pub fn at(start: DateTime<Utc>, tick: i64) -> DateTime<Utc> {
    start + Duration::nanoseconds(tick * 1_000_000_000 / FPS)
}

pub fn epoch() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-05T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn temp_path(prefix: &str, extension: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{prefix}-{}.{extension}", Uuid::new_v4()))
}

/// A 478-point mesh spread over the middle of the frame whose eyes both
/// have the given aspect ratio.
pub fn mesh_with_ear(ear: f64) -> Vec<Point> {
    let mut points: Vec<Point> = (0..478)
        .map(|i| {
            let col = (i % 22) as f64 / 21.0;
            let row = (i / 22) as f64 / 21.0;
            Point::new(0.3 + 0.4 * col, 0.25 + 0.5 * row)
        })
        .collect();

    for (eye, cx) in [(LEFT_EYE, 0.6), (RIGHT_EYE, 0.4)] {
        let width = 0.08;
        let height = ear * width;
        let cy = 0.4;
        let place = [
            Point::new(cx - width / 2.0, cy),
            Point::new(cx - width / 6.0, cy - height / 2.0),
            Point::new(cx + width / 6.0, cy - height / 2.0),
            Point::new(cx + width / 2.0, cy),
            Point::new(cx + width / 6.0, cy + height / 2.0),
            Point::new(cx - width / 6.0, cy + height / 2.0),
        ];
        for (idx, point) in eye.iter().zip(place) {
            points[*idx] = point;
        }
    }
    points
}

/// Frames one thirtieth of a second apart, starting at `start`.
pub struct ClockedSource {
    start: DateTime<Utc>,
    tick: i64,
}

impl ClockedSource {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { start, tick: 0 }
    }
}

impl FrameSource for ClockedSource {
    fn capture(&mut self) -> Result<Frame> {
        let captured_at = at(self.start, self.tick);
        self.tick += 1;
        Ok(Frame {
            image: RgbImage::from_pixel(64, 48, Rgb([180, 140, 120])),
            captured_at,
        })
    }
}

/// Plays back one EAR per frame (`None` = no face), then repeats `tail`.
pub struct ScriptedFace {
    script: VecDeque<Option<f64>>,
    tail: Option<f64>,
}

impl ScriptedFace {
    pub fn new(script: impl IntoIterator<Item = Option<f64>>, tail: Option<f64>) -> Self {
        Self {
            script: script.into_iter().collect(),
            tail,
        }
    }

    /// The same reading on every frame.
    pub fn steady(ear: Option<f64>) -> Self {
        Self {
            script: VecDeque::new(),
            tail: ear,
        }
    }
}

impl LandmarkProvider for ScriptedFace {
    fn detect(&mut self, _frame: &Frame) -> Result<Option<Vec<Point>>> {
        let ear = self.script.pop_front().unwrap_or(self.tail);
        Ok(ear.map(mesh_with_ear))
    }
}

/// One scripted landmark reading.
#[derive(Debug, Clone, Copy)]
pub enum Reading {
    Face(f64),
    NoFace,
    /// The detector errors out; the frame is still consumed.
    Fail,
}

/// Like [`ScriptedFace`], but can also fail. After the script every
/// detection fails, which freezes the monitored session in place.
pub struct ReadingScript {
    script: VecDeque<Reading>,
}

impl ReadingScript {
    pub fn new(script: impl IntoIterator<Item = Reading>) -> Self {
        Self {
            script: script.into_iter().collect(),
        }
    }
}

impl LandmarkProvider for ReadingScript {
    fn detect(&mut self, _frame: &Frame) -> Result<Option<Vec<Point>>> {
        match self.script.pop_front().unwrap_or(Reading::Fail) {
            Reading::Face(ear) => Ok(Some(mesh_with_ear(ear))),
            Reading::NoFace => Ok(None),
            Reading::Fail => bail!("detector unavailable"),
        }
    }
}

/// Every face embeds to the same vector.
pub struct FixedEmbedder(pub Vec<f32>);

impl Embedder for FixedEmbedder {
    fn embed(&mut self, _face: &RgbImage) -> Result<Vec<f32>> {
        Ok(self.0.clone())
    }
}

use anyhow::{Context, Result};
use image::imageops;
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::{
    sensing::{CaptureRig, Embedder},
    signal::face_bounds,
};

use super::{
    gallery::Gallery,
    matcher::{IdentityMatcher, MatchError, MatchResult, MatchVerdict},
};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Identified {
    pub employee_id: i64,
    pub name: String,
    pub score: f32,
    pub confidence_gap: f32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum RecognitionOutcome {
    Identified(Identified),
    /// Budget ran out; the caller decides whether to try again.
    NotFound {
        attempts: u32,
        last_best: Option<MatchResult>,
    },
    NoKnownIdentities,
}

#[derive(Debug, Clone, Copy)]
pub struct RecognitionParams {
    pub budget: Duration,
    /// Evaluate every n-th frame.
    pub frame_skip: u32,
    pub crop_margin: f32,
}

/// Pull frames until someone in `gallery` is accepted or `params.budget`
/// elapses. Blocking; run it off the async runtime.
pub fn recognize(
    rig: &mut CaptureRig,
    embedder: &mut dyn Embedder,
    gallery: &Gallery,
    matcher: &IdentityMatcher,
    params: RecognitionParams,
) -> Result<RecognitionOutcome> {
    if gallery.is_empty() {
        return Ok(RecognitionOutcome::NoKnownIdentities);
    }

    let deadline = Instant::now() + params.budget;
    let frame_skip = u64::from(params.frame_skip.max(1));
    let mut frame_index: u64 = 0;
    let mut attempts = 0;
    let mut last_best = None;

    while Instant::now() < deadline {
        let capture = rig.capture()?;
        frame_index += 1;
        if frame_index % frame_skip != 0 {
            continue;
        }

        let Some(points) = capture.landmarks else {
            continue;
        };
        let image = &capture.frame.image;
        let Some(bounds) = face_bounds(&points, image.width(), image.height(), params.crop_margin) else {
            continue;
        };
        let face = imageops::crop_imm(image, bounds.x, bounds.y, bounds.width, bounds.height).to_image();

        let embedding = embedder.embed(&face).context("face embedding failed")?;
        let result = match matcher.match_embedding(&embedding, gallery) {
            Ok(result) => result,
            // Nothing usable in this crop; same as a frame without a face.
            Err(MatchError::DegenerateQuery) => continue,
            Err(err) => return Err(err).context("identity match failed"),
        };
        attempts += 1;

        match result.verdict {
            MatchVerdict::Accepted => {
                if let Some(best) = result.best {
                    log::info!(
                        "recognized {} (score {:.3}, gap {:.3}) after {attempts} attempts",
                        best.name,
                        best.score,
                        result.confidence_gap
                    );
                    return Ok(RecognitionOutcome::Identified(Identified {
                        employee_id: best.employee_id,
                        name: best.name,
                        score: best.score,
                        confidence_gap: result.confidence_gap,
                    }));
                }
            }
            MatchVerdict::NoKnownIdentities => return Ok(RecognitionOutcome::NoKnownIdentities),
            MatchVerdict::Rejected => last_best = Some(result),
        }
    }

    log::info!("no identity found within {:?} ({attempts} attempts)", params.budget);
    Ok(RecognitionOutcome::NotFound { attempts, last_best })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::MatchThresholds,
        sensing::{Frame, FrameSource, LandmarkProvider},
        signal::Point,
    };
    use image::{Rgb, RgbImage};

    struct SolidSource(Rgb<u8>);

    impl FrameSource for SolidSource {
        fn capture(&mut self) -> Result<Frame> {
            Ok(Frame::new(RgbImage::from_pixel(64, 48, self.0)))
        }
    }

    struct FixedFace(Option<Vec<Point>>);

    impl LandmarkProvider for FixedFace {
        fn detect(&mut self, _frame: &Frame) -> Result<Option<Vec<Point>>> {
            Ok(self.0.clone())
        }
    }

    /// Embeds a face as its mean colour, so a red frame maps to the x axis.
    struct MeanColour {
        calls: u32,
    }

    impl Embedder for MeanColour {
        fn embed(&mut self, face: &RgbImage) -> Result<Vec<f32>> {
            self.calls += 1;
            let mut sum = [0f32; 3];
            for pixel in face.pixels() {
                for (s, &c) in sum.iter_mut().zip(pixel.0.iter()) {
                    *s += f32::from(c);
                }
            }
            Ok(sum.to_vec())
        }
    }

    fn rig(face: Option<Vec<Point>>) -> CaptureRig {
        CaptureRig::new(Box::new(SolidSource(Rgb([200, 10, 10]))), Box::new(FixedFace(face)))
    }

    fn face() -> Vec<Point> {
        vec![Point::new(0.3, 0.3), Point::new(0.7, 0.8)]
    }

    fn params(budget_ms: u64) -> RecognitionParams {
        RecognitionParams {
            budget: Duration::from_millis(budget_ms),
            frame_skip: 2,
            crop_margin: 0.1,
        }
    }

    #[test]
    fn identifies_enrolled_face() {
        let mut gallery = Gallery::new();
        gallery.insert("red", 4, &[1.0, 0.05, 0.05]).unwrap();
        gallery.insert("green", 5, &[0.0, 1.0, 0.0]).unwrap();
        let mut embedder = MeanColour { calls: 0 };

        let outcome = recognize(
            &mut rig(Some(face())),
            &mut embedder,
            &gallery,
            &IdentityMatcher::new(MatchThresholds::default()),
            params(2_000),
        )
        .unwrap();

        match outcome {
            RecognitionOutcome::Identified(who) => assert_eq!(who.employee_id, 4),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(embedder.calls, 1);
    }

    #[test]
    fn times_out_without_face() {
        let mut gallery = Gallery::new();
        gallery.insert("red", 4, &[1.0, 0.0, 0.0]).unwrap();
        let mut embedder = MeanColour { calls: 0 };

        let outcome = recognize(
            &mut rig(None),
            &mut embedder,
            &gallery,
            &IdentityMatcher::default(),
            params(30),
        )
        .unwrap();

        assert_eq!(
            outcome,
            RecognitionOutcome::NotFound {
                attempts: 0,
                last_best: None
            }
        );
        assert_eq!(embedder.calls, 0);
    }

    #[test]
    fn unknown_face_reports_last_best() {
        let mut gallery = Gallery::new();
        gallery.insert("blue", 9, &[0.0, 0.0, 1.0]).unwrap();
        let mut embedder = MeanColour { calls: 0 };

        let outcome = recognize(
            &mut rig(Some(face())),
            &mut embedder,
            &gallery,
            &IdentityMatcher::default(),
            params(30),
        )
        .unwrap();

        match outcome {
            RecognitionOutcome::NotFound { attempts, last_best } => {
                assert!(attempts >= 1);
                assert_eq!(last_best.map(|r| r.verdict), Some(MatchVerdict::Rejected));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn empty_gallery_short_circuits() {
        let mut embedder = MeanColour { calls: 0 };
        let outcome = recognize(
            &mut rig(Some(face())),
            &mut embedder,
            &Gallery::new(),
            &IdentityMatcher::default(),
            params(1_000),
        )
        .unwrap();
        assert_eq!(outcome, RecognitionOutcome::NoKnownIdentities);
    }

    #[test]
    fn blank_embedding_is_skipped_not_fatal() {
        let mut gallery = Gallery::new();
        gallery.insert("red", 4, &[1.0, 0.0, 0.0]).unwrap();
        let mut embedder = MeanColour { calls: 0 };
        let mut black = CaptureRig::new(
            Box::new(SolidSource(Rgb([0, 0, 0]))),
            Box::new(FixedFace(Some(face()))),
        );

        let outcome = recognize(
            &mut black,
            &mut embedder,
            &gallery,
            &IdentityMatcher::default(),
            params(30),
        )
        .unwrap();

        assert_eq!(
            outcome,
            RecognitionOutcome::NotFound {
                attempts: 0,
                last_best: None
            }
        );
        assert!(embedder.calls >= 1);
    }

    #[test]
    fn wrong_embedding_size_is_an_error() {
        struct Flat;
        impl Embedder for Flat {
            fn embed(&mut self, _face: &RgbImage) -> Result<Vec<f32>> {
                Ok(vec![1.0, 0.0])
            }
        }

        let mut gallery = Gallery::new();
        gallery.insert("red", 4, &[1.0, 0.0, 0.0]).unwrap();
        let result = recognize(
            &mut rig(Some(face())),
            &mut Flat,
            &gallery,
            &IdentityMatcher::default(),
            params(1_000),
        );
        assert!(result.is_err());
    }
}

//! Dual-threshold identity decision.
//!
//! A query is accepted only when its best similarity clears the score
//! threshold and beats the runner-up by more than the gap threshold, so a
//! gallery of look-alikes cannot produce a confident false accept.

use serde::Serialize;
use std::cmp::Ordering;
use thiserror::Error;

use crate::config::MatchThresholds;

use super::gallery::{normalize, Gallery};

/// Gap reported when the gallery holds a single identity.
pub const LONE_IDENTITY_GAP: f32 = 1.0;

#[derive(Debug, Error, PartialEq)]
pub enum MatchError {
    #[error("query embedding has {actual} dimensions, gallery uses {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("query embedding has zero or non-finite norm")]
    DegenerateQuery,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MatchVerdict {
    Accepted,
    /// Unknown person.
    Rejected,
    NoKnownIdentities,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub name: String,
    pub employee_id: i64,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub verdict: MatchVerdict,
    /// Present whenever the gallery was non-empty, accepted or not.
    pub best: Option<MatchCandidate>,
    pub runner_up_score: Option<f32>,
    pub confidence_gap: f32,
}

impl MatchResult {
    fn no_known_identities() -> Self {
        Self {
            verdict: MatchVerdict::NoKnownIdentities,
            best: None,
            runner_up_score: None,
            confidence_gap: 0.0,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.verdict == MatchVerdict::Accepted
    }

    /// The winning identity, only when accepted.
    pub fn accepted(&self) -> Option<&MatchCandidate> {
        if self.is_accepted() {
            self.best.as_ref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMatcher {
    thresholds: MatchThresholds,
}

impl IdentityMatcher {
    pub fn new(thresholds: MatchThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> MatchThresholds {
        self.thresholds
    }

    pub fn match_embedding(&self, query: &[f32], gallery: &Gallery) -> Result<MatchResult, MatchError> {
        let Some(expected) = gallery.dimension() else {
            return Ok(MatchResult::no_known_identities());
        };
        if query.len() != expected {
            return Err(MatchError::DimensionMismatch {
                expected,
                actual: query.len(),
            });
        }
        let query = normalize(query).ok_or(MatchError::DegenerateQuery)?;

        let mut ranked: Vec<MatchCandidate> = gallery
            .entries()
            .iter()
            .map(|entry| MatchCandidate {
                name: entry.name.clone(),
                employee_id: entry.employee_id,
                score: dot(&query, &entry.embedding),
            })
            .collect();
        // Equal scores fall back to name order so the ranking never depends
        // on enrolment order.
        ranked.sort_by(|a, b| match b.score.total_cmp(&a.score) {
            Ordering::Equal => a.name.cmp(&b.name),
            other => other,
        });

        let runner_up_score = ranked.get(1).map(|c| c.score);
        let mut ranked = ranked.into_iter();
        let Some(best) = ranked.next() else {
            return Ok(MatchResult::no_known_identities());
        };
        let confidence_gap = match runner_up_score {
            Some(second) => (best.score - second).max(0.0),
            None => LONE_IDENTITY_GAP,
        };

        let accepted =
            best.score > self.thresholds.score_threshold && confidence_gap > self.thresholds.gap_threshold;
        Ok(MatchResult {
            verdict: if accepted {
                MatchVerdict::Accepted
            } else {
                MatchVerdict::Rejected
            },
            best: Some(best),
            runner_up_score,
            confidence_gap,
        })
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    let sum: f64 = a.iter().zip(b).map(|(&x, &y)| f64::from(x) * f64::from(y)).sum();
    sum as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn matcher(score: f32, gap: f32) -> IdentityMatcher {
        IdentityMatcher::new(MatchThresholds {
            score_threshold: score,
            gap_threshold: gap,
        })
    }

    /// Unit vector whose cosine with the x axis is `cos`, bent along `axis`.
    fn at_cosine(cos: f32, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; 3];
        v[0] = cos;
        v[axis] = (1.0 - cos * cos).sqrt();
        v
    }

    #[test]
    fn close_runner_up_is_rejected() {
        let mut gallery = Gallery::new();
        gallery.insert("A", 1, &at_cosine(0.95, 1)).unwrap();
        gallery.insert("B", 2, &at_cosine(0.94, 2)).unwrap();

        let result = matcher(0.9, 0.03).match_embedding(&[1.0, 0.0, 0.0], &gallery).unwrap();
        assert_eq!(result.verdict, MatchVerdict::Rejected);
        let best = result.best.as_ref().unwrap();
        assert_eq!(best.name, "A");
        assert!((best.score - 0.95).abs() < 1e-5);
        assert!((result.confidence_gap - 0.01).abs() < 1e-4);
        assert!(result.accepted().is_none());
    }

    #[test]
    fn clear_winner_is_accepted() {
        let mut gallery = Gallery::new();
        gallery.insert("A", 1, &at_cosine(0.95, 1)).unwrap();
        gallery.insert("B", 2, &at_cosine(0.5, 2)).unwrap();

        let result = matcher(0.9, 0.03).match_embedding(&[2.0, 0.0, 0.0], &gallery).unwrap();
        assert_eq!(result.accepted().map(|c| c.employee_id), Some(1));
    }

    #[test]
    fn empty_gallery_has_no_known_identities() {
        let result = IdentityMatcher::default()
            .match_embedding(&[0.3, 0.1], &Gallery::new())
            .unwrap();
        assert_eq!(result.verdict, MatchVerdict::NoKnownIdentities);
        assert!(result.best.is_none());
    }

    #[test]
    fn lone_identity_gap_is_one() {
        let mut gallery = Gallery::new();
        gallery.insert("A", 1, &[1.0, 0.0]).unwrap();
        let result = matcher(0.8, 0.05).match_embedding(&[1.0, 0.1], &gallery).unwrap();
        assert_eq!(result.confidence_gap, LONE_IDENTITY_GAP);
        assert_eq!(result.runner_up_score, None);
        assert!(result.is_accepted());
    }

    #[test]
    fn wrong_dimension_is_an_error() {
        let mut gallery = Gallery::new();
        gallery.insert("A", 1, &[1.0, 0.0]).unwrap();
        assert_eq!(
            IdentityMatcher::default().match_embedding(&[1.0, 0.0, 0.0], &gallery),
            Err(MatchError::DimensionMismatch { expected: 2, actual: 3 })
        );
        assert_eq!(
            IdentityMatcher::default().match_embedding(&[0.0, 0.0], &gallery),
            Err(MatchError::DegenerateQuery)
        );
    }

    fn embedding() -> impl Strategy<Value = Vec<f32>> {
        prop::collection::vec(-1.0f32..1.0, 4).prop_filter("non-zero", |v| normalize(v).is_some())
    }

    proptest! {
        #[test]
        fn verdict_ignores_enrolment_order(
            vectors in prop::collection::vec(embedding(), 1..8),
            query in embedding(),
            seed in any::<u64>(),
        ) {
            let named: Vec<(String, Vec<f32>)> = vectors
                .into_iter()
                .enumerate()
                .map(|(i, v)| (format!("id{i}"), v))
                .collect();

            let mut shuffled = named.clone();
            let len = shuffled.len();
            // Deterministic Fisher-Yates driven by the seed.
            let mut state = seed;
            for i in (1..len).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let j = (state >> 33) as usize % (i + 1);
                shuffled.swap(i, j);
            }

            let build = |entries: &[(String, Vec<f32>)]| {
                let mut gallery = Gallery::new();
                for (i, (name, v)) in entries.iter().enumerate() {
                    gallery.insert(name.clone(), i as i64, v).unwrap();
                }
                gallery
            };

            let m = matcher(0.5, 0.05);
            let a = m.match_embedding(&query, &build(&named)).unwrap();
            let b = m.match_embedding(&query, &build(&shuffled)).unwrap();
            prop_assert_eq!(a.verdict, b.verdict);
            prop_assert_eq!(
                a.best.as_ref().map(|c| c.name.clone()),
                b.best.as_ref().map(|c| c.name.clone())
            );
        }

        #[test]
        fn confidence_gap_is_never_negative(
            vectors in prop::collection::vec(embedding(), 2..8),
            query in embedding(),
        ) {
            let mut gallery = Gallery::new();
            for (i, v) in vectors.iter().enumerate() {
                gallery.insert(format!("id{i}"), i as i64, v).unwrap();
            }
            let result = IdentityMatcher::default().match_embedding(&query, &gallery).unwrap();
            prop_assert!(result.confidence_gap >= 0.0);
        }
    }
}

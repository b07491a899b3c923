use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::tracking::ClosureEvent;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum Presence {
    #[default]
    Present,
    Absent,
}

/// A saved frame captured when a closure was flushed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrameReference {
    pub captured_at: DateTime<Utc>,
    pub path: PathBuf,
}

/// Cumulative productivity for one identified subject over one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductivityRecord {
    pub identity_id: i64,
    pub name: String,
    pub session_start: DateTime<Utc>,
    pub total_session_secs: f64,
    pub total_closed_secs: f64,
    pub closure_events: Vec<ClosureEvent>,
    pub frame_references: Vec<FrameReference>,
    /// In [0, 100].
    pub productivity_score: f64,
    pub presence: Presence,
}

impl ProductivityRecord {
    pub fn new(identity_id: i64, name: impl Into<String>, session_start: DateTime<Utc>) -> Self {
        Self {
            identity_id,
            name: name.into(),
            session_start,
            total_session_secs: 0.0,
            total_closed_secs: 0.0,
            closure_events: Vec::new(),
            frame_references: Vec::new(),
            productivity_score: 100.0,
            presence: Presence::Present,
        }
    }

    pub fn push_frame_reference(&mut self, reference: FrameReference) {
        self.frame_references.push(reference);
    }
}

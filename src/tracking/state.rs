use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum EyeState {
    #[default]
    Calibrating,
    Open,
    Closed,
    Absent,
}

impl EyeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EyeState::Calibrating => "calibrating",
            EyeState::Open => "open",
            EyeState::Closed => "closed",
            EyeState::Absent => "absent",
        }
    }
}

/// Per-tick reading before debounce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RawLabel {
    Open,
    Closed,
}

/// One confirmed closure chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClosureEvent {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_secs: f64,
}

impl ClosureEvent {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            duration_secs: seconds_between(start, end),
        }
    }
}

pub(crate) fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let elapsed = end - start;
    match elapsed.num_nanoseconds() {
        Some(ns) => ns as f64 / 1e9,
        None => elapsed.num_milliseconds() as f64 / 1e3,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EyeStateSession {
    pub current_state: EyeState,
    pub state_start_time: DateTime<Utc>,
    /// Consecutive confirmed-closed ticks in the current run.
    pub closed_frame_count: u32,
    #[serde(skip)]
    pub recent_state_votes: VecDeque<RawLabel>,
    pub closure_log: Vec<ClosureEvent>,
    /// Always equals the sum of `closure_log` durations.
    pub total_closed_secs: f64,
}

impl EyeStateSession {
    pub fn new(started_at: DateTime<Utc>, vote_window: usize) -> Self {
        Self {
            current_state: EyeState::Calibrating,
            state_start_time: started_at,
            closed_frame_count: 0,
            recent_state_votes: VecDeque::with_capacity(vote_window),
            closure_log: Vec::new(),
            total_closed_secs: 0.0,
        }
    }

    pub(crate) fn record_closure(&mut self, event: ClosureEvent) {
        self.total_closed_secs += event.duration_secs;
        self.closure_log.push(event);
    }

    pub(crate) fn enter(&mut self, state: EyeState, now: DateTime<Utc>) {
        if self.current_state != state {
            self.current_state = state;
            self.state_start_time = now;
        }
    }
}

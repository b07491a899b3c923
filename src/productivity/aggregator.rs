use chrono::{DateTime, Utc};

use crate::tracking::{state::seconds_between, ClosureEvent};

use super::record::ProductivityRecord;

/// `max(0, 100 * (1 - closed / session))`, clamped to [0, 100]. A session of
/// zero length scores 100.
pub fn productivity_score(total_closed_secs: f64, total_session_secs: f64) -> f64 {
    if total_session_secs.is_nan() || total_session_secs <= 0.0 {
        return 100.0;
    }
    let score = 100.0 * (1.0 - total_closed_secs / total_session_secs);
    if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Fold newly flushed closure events into `record` as of `now`.
///
/// Only `events` are added to the closed total, so calling again with an
/// empty slice just refreshes the session length and score. The session
/// length never decreases, even if `now` runs behind an earlier call.
pub fn update(record: &ProductivityRecord, events: &[ClosureEvent], now: DateTime<Utc>) -> ProductivityRecord {
    let mut next = record.clone();

    for event in events {
        next.total_closed_secs += event.duration_secs;
        next.closure_events.push(event.clone());
    }

    let elapsed = seconds_between(record.session_start, now).max(0.0);
    next.total_session_secs = next.total_session_secs.max(elapsed);
    next.productivity_score = productivity_score(next.total_closed_secs, next.total_session_secs);
    next
}

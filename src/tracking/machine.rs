//! Debounced open/closed classification with chunked closure logging.
//!
//! Two stages stand between a denoised EAR and a state change: a hysteresis
//! band around the adaptive threshold produces a raw label, then a vote
//! window must reach quorum before the label is confirmed. Closed runs are
//! logged in chunks of at least `closed_duration_threshold_secs` so long
//! closures stream out while the eyes are still shut.

use chrono::{DateTime, Duration, Utc};

use crate::config::{AbsencePolicy, EyeStateConfig};

use super::state::{ClosureEvent, EyeState, EyeStateSession, RawLabel};

/// A closed run interrupted by face loss under [`AbsencePolicy::Merge`].
#[derive(Debug, Clone, Copy)]
struct SuspendedRun {
    start: DateTime<Utc>,
    frames: u32,
    absent_since: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EyeStateMachine {
    config: EyeStateConfig,
    min_run: Duration,
    session: EyeStateSession,
    suspended: Option<SuspendedRun>,
}

impl EyeStateMachine {
    pub fn new(config: &EyeStateConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            config: config.clone(),
            min_run: config.closed_duration_threshold(),
            session: EyeStateSession::new(started_at, config.vote_window),
            suspended: None,
        }
    }

    pub fn session(&self) -> &EyeStateSession {
        &self.session
    }

    pub fn state(&self) -> EyeState {
        self.session.current_state
    }

    /// Advance one tick with a denoised EAR. `threshold` is `None` until calibrated.
    ///
    /// Returns the closure events flushed on this tick, already reflected in
    /// the session's log and total.
    pub fn update(&mut self, ear: f64, threshold: Option<f64>, now: DateTime<Utc>) -> Vec<ClosureEvent> {
        let mut flushed = Vec::new();

        let Some(threshold) = threshold else {
            self.session.enter(EyeState::Calibrating, now);
            return flushed;
        };

        let raw = self.classify(ear, threshold);
        self.push_vote(raw);

        let Some(confirmed) = self.confirmed_label() else {
            return flushed;
        };

        match confirmed {
            RawLabel::Closed => {
                if self.session.current_state != EyeState::Closed {
                    self.session.enter(EyeState::Closed, now);
                    match self.suspended.take() {
                        Some(run) => {
                            self.session.state_start_time = run.start;
                            self.session.closed_frame_count = run.frames;
                        }
                        None => {
                            self.session.state_start_time = now;
                            self.session.closed_frame_count = 0;
                        }
                    }
                } else {
                    self.session.closed_frame_count += 1;
                    if self.run_qualifies(now) {
                        flushed.push(self.flush_run(now));
                        self.session.state_start_time = now;
                        self.session.closed_frame_count = 0;
                    }
                }
            }
            RawLabel::Open => {
                flushed.extend(self.flush_suspended());
                if self.session.current_state == EyeState::Closed && self.run_qualifies(now) {
                    flushed.push(self.flush_run(now));
                }
                self.session.closed_frame_count = 0;
                self.session.enter(EyeState::Open, now);
            }
        }

        flushed
    }

    /// No face this tick. Accumulated totals survive; votes do not.
    pub fn mark_absent(&mut self, now: DateTime<Utc>) -> Vec<ClosureEvent> {
        let mut flushed = Vec::new();

        if self.session.current_state == EyeState::Closed {
            match self.config.absence_policy {
                AbsencePolicy::Split => {
                    if self.run_qualifies(now) {
                        flushed.push(self.flush_run(now));
                    }
                }
                AbsencePolicy::Merge => {
                    self.suspended = Some(SuspendedRun {
                        start: self.session.state_start_time,
                        frames: self.session.closed_frame_count,
                        absent_since: now,
                    });
                }
            }
        }

        self.session.closed_frame_count = 0;
        self.session.recent_state_votes.clear();
        self.session.enter(EyeState::Absent, now);
        flushed
    }

    /// Flush whatever qualifying closure is still open. Used when monitoring ends.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Vec<ClosureEvent> {
        let mut flushed: Vec<ClosureEvent> = self.flush_suspended().into_iter().collect();
        if self.session.current_state == EyeState::Closed && self.run_qualifies(now) {
            flushed.push(self.flush_run(now));
            self.session.state_start_time = now;
        }
        self.session.closed_frame_count = 0;
        flushed
    }

    fn classify(&self, ear: f64, threshold: f64) -> RawLabel {
        let margin = threshold * self.config.hysteresis_ratio;
        if ear < threshold - margin {
            RawLabel::Closed
        } else if ear > threshold + margin {
            RawLabel::Open
        } else {
            // Inside the band the confirmed state holds; with nothing
            // confirmed yet the eyes are presumed open.
            match self.session.current_state {
                EyeState::Closed => RawLabel::Closed,
                _ => RawLabel::Open,
            }
        }
    }

    fn push_vote(&mut self, label: RawLabel) {
        let votes = &mut self.session.recent_state_votes;
        if votes.len() >= self.config.vote_window {
            votes.pop_front();
        }
        votes.push_back(label);
    }

    fn confirmed_label(&self) -> Option<RawLabel> {
        let votes = &self.session.recent_state_votes;
        let closed = votes.iter().filter(|v| **v == RawLabel::Closed).count();
        let open = votes.len() - closed;
        if closed >= self.config.vote_quorum {
            Some(RawLabel::Closed)
        } else if open >= self.config.vote_quorum {
            Some(RawLabel::Open)
        } else {
            None
        }
    }

    fn run_qualifies(&self, now: DateTime<Utc>) -> bool {
        qualifies(
            self.session.state_start_time,
            self.session.closed_frame_count,
            now,
            &self.config,
            self.min_run,
        )
    }

    fn flush_run(&mut self, now: DateTime<Utc>) -> ClosureEvent {
        let event = ClosureEvent::between(self.session.state_start_time, now);
        self.session.record_closure(event.clone());
        event
    }

    fn flush_suspended(&mut self) -> Option<ClosureEvent> {
        let run = self.suspended.take()?;
        if !qualifies(run.start, run.frames, run.absent_since, &self.config, self.min_run) {
            return None;
        }
        let event = ClosureEvent::between(run.start, run.absent_since);
        self.session.record_closure(event.clone());
        Some(event)
    }
}

fn qualifies(
    start: DateTime<Utc>,
    frames: u32,
    end: DateTime<Utc>,
    config: &EyeStateConfig,
    min_run: Duration,
) -> bool {
    frames >= config.min_closed_frames && end - start >= min_run
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-05T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn at(tick: i64) -> DateTime<Utc> {
        t0() + Duration::nanoseconds(tick * 1_000_000_000 / 30)
    }

    fn config() -> EyeStateConfig {
        config_with_frames(30)
    }

    fn config_with_frames(min_closed_frames: u32) -> EyeStateConfig {
        EyeStateConfig {
            hysteresis_ratio: 0.2,
            vote_window: 7,
            vote_quorum: 5,
            min_closed_frames,
            closed_duration_threshold_secs: 1.0,
            absence_policy: AbsencePolicy::Split,
        }
    }

    fn feed(machine: &mut EyeStateMachine, ear: f64, ticks: std::ops::Range<i64>) -> Vec<ClosureEvent> {
        ticks.flat_map(|i| machine.update(ear, Some(0.3), at(i))).collect()
    }

    #[test]
    fn stays_calibrating_without_threshold() {
        let mut m = EyeStateMachine::new(&config(), t0());
        for i in 0..50 {
            assert!(m.update(0.05, None, at(i)).is_empty());
        }
        assert_eq!(m.state(), EyeState::Calibrating);
    }

    #[test]
    fn needs_quorum_before_leaving_calibrating() {
        let mut m = EyeStateMachine::new(&config(), t0());
        feed(&mut m, 0.4, 0..4);
        assert_eq!(m.state(), EyeState::Calibrating);
        feed(&mut m, 0.4, 4..5);
        assert_eq!(m.state(), EyeState::Open);
    }

    #[test]
    fn single_dip_does_not_flip_state() {
        let mut m = EyeStateMachine::new(&config(), t0());
        feed(&mut m, 0.4, 0..10);
        // Below the band for one tick, then inside the band.
        feed(&mut m, 0.1, 10..11);
        feed(&mut m, 0.28, 11..15);
        assert_eq!(m.state(), EyeState::Open);
        assert!(m.session().closure_log.is_empty());
    }

    #[test]
    fn band_values_keep_previous_label() {
        let mut m = EyeStateMachine::new(&config(), t0());
        feed(&mut m, 0.1, 0..10);
        assert_eq!(m.state(), EyeState::Closed);
        // 0.32 sits above the threshold but inside the band.
        feed(&mut m, 0.32, 10..30);
        assert_eq!(m.state(), EyeState::Closed);
    }

    #[test]
    fn long_closure_logs_in_chunks() {
        let mut m = EyeStateMachine::new(&config(), t0());
        feed(&mut m, 0.4, 0..10);
        let events = feed(&mut m, 0.1, 10..110);

        // Confirmation at tick 14, chunks at 44, 74, 104.
        assert_eq!(events.len(), 3);
        for event in &events {
            assert!((event.duration_secs - 1.0).abs() < 1e-9);
        }
        assert_eq!(events[0].start, at(14));
        assert_eq!(events[0].end, at(44));
        let total: f64 = m.session().closure_log.iter().map(|e| e.duration_secs).sum();
        assert!((m.session().total_closed_secs - total).abs() < 1e-9);
    }

    #[test]
    fn reopening_flushes_qualifying_run() {
        let mut m = EyeStateMachine::new(&config_with_frames(10), t0());
        feed(&mut m, 0.4, 0..10);
        feed(&mut m, 0.1, 10..70);
        assert_eq!(m.session().closure_log.len(), 1);

        // The run restarted at 44; open is confirmed at 74, a full second later.
        let events = feed(&mut m, 0.4, 70..80);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, at(44));
        assert_eq!(events[0].end, at(74));
        assert_eq!(m.state(), EyeState::Open);
    }

    #[test]
    fn short_closure_is_dropped() {
        let mut m = EyeStateMachine::new(&config(), t0());
        feed(&mut m, 0.4, 0..10);
        feed(&mut m, 0.1, 10..30);
        let events = feed(&mut m, 0.4, 30..40);
        assert!(events.is_empty());
        assert_eq!(m.session().total_closed_secs, 0.0);
    }

    #[test]
    fn face_loss_flushes_qualifying_run_under_split() {
        let mut m = EyeStateMachine::new(&config_with_frames(10), t0());
        feed(&mut m, 0.4, 0..10);
        feed(&mut m, 0.1, 10..70);
        let events = m.mark_absent(at(75));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, at(44));
        assert_eq!(events[0].end, at(75));
        assert_eq!(m.state(), EyeState::Absent);
        assert!(m.session().recent_state_votes.is_empty());
    }

    #[test]
    fn face_loss_drops_short_run_under_split() {
        let mut m = EyeStateMachine::new(&config(), t0());
        feed(&mut m, 0.4, 0..10);
        feed(&mut m, 0.1, 10..30);
        assert!(m.mark_absent(at(30)).is_empty());
        // Returning with closed eyes starts a fresh run.
        let events = feed(&mut m, 0.1, 31..60);
        assert!(events.is_empty());
        assert_eq!(m.session().state_start_time, at(35));
    }

    #[test]
    fn merge_policy_resumes_run_across_absence() {
        let mut cfg = config();
        cfg.absence_policy = AbsencePolicy::Merge;
        let mut m = EyeStateMachine::new(&cfg, t0());
        feed(&mut m, 0.4, 0..10);
        // Confirmed closed at 14, 15 frames counted by tick 29.
        feed(&mut m, 0.1, 10..30);
        assert!(m.mark_absent(at(30)).is_empty());
        assert!(m.mark_absent(at(40)).is_empty());

        // Back with eyes still shut: quorum again at tick 54, run resumes from 14.
        let events = feed(&mut m, 0.1, 50..70);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, at(14));
    }

    #[test]
    fn merge_policy_flushes_at_absence_start_when_reopened() {
        let mut cfg = config_with_frames(10);
        cfg.absence_policy = AbsencePolicy::Merge;
        let mut m = EyeStateMachine::new(&cfg, t0());
        feed(&mut m, 0.4, 0..10);
        feed(&mut m, 0.1, 10..60);
        m.mark_absent(at(80));

        let events = feed(&mut m, 0.4, 90..100);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, at(44));
        assert_eq!(events[0].end, at(80));
    }

    #[test]
    fn finish_flushes_open_run() {
        let mut m = EyeStateMachine::new(&config_with_frames(10), t0());
        feed(&mut m, 0.4, 0..10);
        feed(&mut m, 0.1, 10..40);
        assert!(m.session().closure_log.is_empty());
        let events = m.finish(at(50));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, at(14));
    }

    #[test]
    fn finish_flushes_suspended_run_once() {
        let mut cfg = config_with_frames(10);
        cfg.absence_policy = AbsencePolicy::Merge;
        let mut m = EyeStateMachine::new(&cfg, t0());
        feed(&mut m, 0.4, 0..10);
        feed(&mut m, 0.1, 10..60);
        assert_eq!(m.session().closure_log.len(), 1);
        assert!(m.mark_absent(at(80)).is_empty());

        let events = m.finish(at(120));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, at(44));
        assert_eq!(events[0].end, at(80));
        assert_eq!(m.session().closure_log.len(), 2);
        let sum: f64 = m.session().closure_log.iter().map(|e| e.duration_secs).sum();
        assert!((m.session().total_closed_secs - sum).abs() < 1e-9);

        assert!(m.finish(at(130)).is_empty());
    }
}

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    config::EngineConfig,
    db::{MonitoringSession, MonitoringStatus},
    persistence::DeliveryStats,
    productivity::{self, FrameReference, Presence, ProductivityRecord},
    tracking::{ClosureEvent, EyeState, EyeTracker, Observation, TickReport},
};

/// Everything one monitored subject accumulates. Lives behind a single
/// mutex so a tick and a stats read never interleave.
pub struct MonitorSession {
    config: EngineConfig,
    row: MonitoringSession,
    name: String,
    tracker: EyeTracker,
    record: ProductivityRecord,
    last_face_at: DateTime<Utc>,
    last_tick_at: DateTime<Utc>,
    ended: Option<MonitoringStatus>,
}

impl MonitorSession {
    pub fn new(config: &EngineConfig, row: MonitoringSession, name: impl Into<String>) -> Self {
        let started_at = row.started_at;
        let name = name.into();
        Self {
            config: config.clone(),
            tracker: EyeTracker::new(config, started_at),
            record: ProductivityRecord::new(row.employee_id, name.clone(), started_at),
            row,
            name,
            last_face_at: started_at,
            last_tick_at: started_at,
            ended: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.row.id
    }

    pub fn employee_id(&self) -> i64 {
        self.row.employee_id
    }

    pub fn ticks(&self) -> u64 {
        self.row.ticks
    }

    pub fn ended(&self) -> Option<MonitoringStatus> {
        self.ended
    }

    pub fn record(&self) -> &ProductivityRecord {
        &self.record
    }

    pub fn last_tick_at(&self) -> DateTime<Utc> {
        self.last_tick_at
    }

    /// Run one observation through the tracker and fold the result into the
    /// record. The clock starts at the first tick, not at construction.
    pub fn apply(&mut self, observation: Observation, now: DateTime<Utc>) -> TickReport {
        if self.row.ticks == 0 {
            self.tracker = EyeTracker::new(&self.config, now);
            self.record = ProductivityRecord::new(self.row.employee_id, self.name.clone(), now);
            self.last_face_at = now;
        }
        self.row.ticks += 1;
        self.last_tick_at = now;

        let report = self.tracker.process(observation, now);
        if observation == Observation::NoFace {
            self.record.presence = Presence::Absent;
        } else {
            self.record.presence = Presence::Present;
            self.last_face_at = now;
        }
        self.record = productivity::update(&self.record, &report.flushed, now);
        report
    }

    pub fn push_frame_reference(&mut self, reference: FrameReference) {
        self.record.push_frame_reference(reference);
    }

    /// Time since a face was last seen, if the subject is absent right now.
    pub fn absent_for(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        (self.tracker.state() == EyeState::Absent).then(|| now - self.last_face_at)
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.record.session_start
    }

    /// Flush whatever closure is still open and freeze the session under
    /// `status`. Returns the flushed events; a second call returns none.
    pub fn finish(&mut self, status: MonitoringStatus, now: DateTime<Utc>) -> Vec<ClosureEvent> {
        if self.ended.is_some() {
            return Vec::new();
        }
        let flushed = self.tracker.finish(now);
        self.record = productivity::update(&self.record, &flushed, now);
        self.ended = Some(status);

        self.row.status = status;
        self.row.stopped_at = Some(now);
        self.row.updated_at = now;
        self.sync_row();
        flushed
    }

    /// Current persisted shape of the session.
    pub fn row(&mut self) -> MonitoringSession {
        self.sync_row();
        self.row.clone()
    }

    fn sync_row(&mut self) {
        self.row.total_closed_secs = self.record.total_closed_secs;
        self.row.productivity_score = self.record.productivity_score;
    }

    pub fn snapshot(&self, delivery: DeliveryStats) -> StatsSnapshot {
        let eye = self.tracker.session();
        StatsSnapshot {
            session_id: self.row.id.clone(),
            employee_id: self.row.employee_id,
            name: self.name.clone(),
            state: eye.current_state,
            state_since: eye.state_start_time,
            calibrated: self.tracker.is_calibrated(),
            threshold: self.tracker.threshold(),
            total_closed_secs: eye.total_closed_secs,
            closure_log: eye.closure_log.clone(),
            record: self.record.clone(),
            ticks: self.row.ticks,
            ended: self.ended,
            delivery,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub session_id: String,
    pub employee_id: i64,
    pub name: String,
    pub state: EyeState,
    pub state_since: DateTime<Utc>,
    pub calibrated: bool,
    pub threshold: Option<f64>,
    pub total_closed_secs: f64,
    pub closure_log: Vec<ClosureEvent>,
    pub record: ProductivityRecord,
    pub ticks: u64,
    /// Set once the monitoring loop has stopped on its own or been stopped.
    pub ended: Option<MonitoringStatus>,
    pub delivery: DeliveryStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(tick: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-05T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::nanoseconds(tick * 1_000_000_000 / 30)
    }

    fn session() -> MonitorSession {
        let mut config = EngineConfig::default();
        config.eye_state.closed_duration_threshold_secs = 1.0;
        MonitorSession::new(&config, MonitoringSession::start(3, at(-90)), "ana")
    }

    #[test]
    fn clock_starts_on_first_tick() {
        let mut session = session();
        session.apply(Observation::Measured(0.3), at(0));
        assert_eq!(session.record().session_start, at(0));
        assert_eq!(session.ticks(), 1);
    }

    #[test]
    fn snapshot_totals_agree() {
        let mut session = session();
        for i in 0..30 {
            session.apply(Observation::Measured(0.3), at(i));
        }
        for i in 30..70 {
            session.apply(Observation::Measured(0.1), at(i));
        }

        let snapshot = session.snapshot(DeliveryStats::default());
        assert_eq!(snapshot.closure_log.len(), 1);
        let sum: f64 = snapshot.closure_log.iter().map(|e| e.duration_secs).sum();
        assert!((snapshot.total_closed_secs - sum).abs() < 1e-9);
        assert!((snapshot.record.total_closed_secs - sum).abs() < 1e-9);
        assert_eq!(snapshot.record.closure_events, snapshot.closure_log);
    }

    #[test]
    fn tracks_absence_and_finishes_once() {
        let mut session = session();
        session.apply(Observation::Measured(0.3), at(0));
        session.apply(Observation::NoFace, at(10));
        assert_eq!(session.record().presence, Presence::Absent);
        assert_eq!(session.absent_for(at(30)), Some(Duration::seconds(1)));

        session.finish(MonitoringStatus::SubjectLost, at(40));
        assert_eq!(session.ended(), Some(MonitoringStatus::SubjectLost));
        assert!(session.finish(MonitoringStatus::Completed, at(50)).is_empty());
        assert_eq!(session.row().status, MonitoringStatus::SubjectLost);
    }
}

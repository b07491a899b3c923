use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MonitoringStatus {
    Running,
    /// Stopped on request.
    Completed,
    /// No face for longer than the absence timeout.
    SubjectLost,
    /// Hit the session length cap.
    TimedOut,
    /// Left running by a crash and closed on the next start.
    Interrupted,
}

impl MonitoringStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitoringStatus::Running => "Running",
            MonitoringStatus::Completed => "Completed",
            MonitoringStatus::SubjectLost => "SubjectLost",
            MonitoringStatus::TimedOut => "TimedOut",
            MonitoringStatus::Interrupted => "Interrupted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSession {
    pub id: String,
    pub employee_id: i64,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub status: MonitoringStatus,
    pub ticks: u64,
    pub total_closed_secs: f64,
    pub productivity_score: f64,
    pub updated_at: DateTime<Utc>,
}

impl MonitoringSession {
    pub fn start(employee_id: i64, started_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            employee_id,
            started_at,
            stopped_at: None,
            status: MonitoringStatus::Running,
            ticks: 0,
            total_closed_secs: 0.0,
            productivity_score: 100.0,
            updated_at: started_at,
        }
    }
}

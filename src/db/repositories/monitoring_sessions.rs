use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime, parse_status, to_i64, to_u64},
    models::{MonitoringSession, MonitoringStatus},
};

const SESSION_COLUMNS: &str =
    "id, employee_id, started_at, stopped_at, status, ticks, total_closed_secs, productivity_score, updated_at";

fn row_to_session(row: &Row) -> Result<MonitoringSession> {
    let started_at: String = row.get("started_at")?;
    let stopped_at: Option<String> = row.get("stopped_at")?;
    let status: String = row.get("status")?;
    let ticks: i64 = row.get("ticks")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(MonitoringSession {
        id: row.get("id")?,
        employee_id: row.get("employee_id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        stopped_at: parse_optional_datetime(stopped_at, "stopped_at")?,
        status: parse_status(&status)?,
        ticks: to_u64(ticks, "ticks")?,
        total_closed_secs: row.get("total_closed_secs")?,
        productivity_score: row.get("productivity_score")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn insert_monitoring_session(&self, session: &MonitoringSession) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO monitoring_sessions (id, employee_id, started_at, stopped_at, status, ticks, total_closed_secs, productivity_score, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id,
                    record.employee_id,
                    record.started_at.to_rfc3339(),
                    record.stopped_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.status.as_str(),
                    to_i64(record.ticks)?,
                    record.total_closed_secs,
                    record.productivity_score,
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Heartbeat from the monitoring loop.
    pub async fn update_monitoring_progress(
        &self,
        session_id: &str,
        ticks: u64,
        total_closed_secs: f64,
        productivity_score: f64,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE monitoring_sessions
                 SET ticks = ?1,
                     total_closed_secs = ?2,
                     productivity_score = ?3,
                     updated_at = ?4
                 WHERE id = ?5",
                params![
                    to_i64(ticks)?,
                    total_closed_secs,
                    productivity_score,
                    updated_at.to_rfc3339(),
                    session_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn finish_monitoring_session(&self, session: &MonitoringSession) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE monitoring_sessions
                 SET status = ?1,
                     stopped_at = ?2,
                     ticks = ?3,
                     total_closed_secs = ?4,
                     productivity_score = ?5,
                     updated_at = ?6
                 WHERE id = ?7",
                params![
                    record.status.as_str(),
                    record.stopped_at.map(|dt| dt.to_rfc3339()),
                    to_i64(record.ticks)?,
                    record.total_closed_secs,
                    record.productivity_score,
                    record.updated_at.to_rfc3339(),
                    record.id,
                ],
            )?;
            if rows_affected == 0 {
                return Err(anyhow!("Monitoring session {} not found", record.id));
            }
            Ok(())
        })
        .await
    }

    pub async fn get_monitoring_session(&self, session_id: &str) -> Result<Option<MonitoringSession>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM monitoring_sessions WHERE id = ?1");
            let row = conn
                .query_row(&sql, params![session_id], |row| Ok(row_to_session(row)))
                .optional()?;
            row.transpose()
        })
        .await
    }

    /// Close every session a crash left `Running`, stamping it with its last
    /// heartbeat. Returns the ids it touched.
    pub async fn recover_interrupted_sessions(&self) -> Result<Vec<String>> {
        self.transaction(|tx| {
            let recovered = {
                let sql = format!(
                    "SELECT {SESSION_COLUMNS} FROM monitoring_sessions WHERE status = ?1 ORDER BY started_at ASC"
                );
                let mut stmt = tx.prepare(&sql)?;
                let mut rows = stmt.query(params![MonitoringStatus::Running.as_str()])?;
                let mut sessions = Vec::new();
                while let Some(row) = rows.next()? {
                    sessions.push(row_to_session(row)?);
                }
                sessions
            };

            for session in &recovered {
                tx.execute(
                    "UPDATE monitoring_sessions
                     SET status = ?1,
                         stopped_at = ?2
                     WHERE id = ?3",
                    params![
                        MonitoringStatus::Interrupted.as_str(),
                        session.updated_at.to_rfc3339(),
                        session.id,
                    ],
                )?;
            }

            Ok(recovered.into_iter().map(|s| s.id).collect())
        })
        .await
    }
}

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::{
    db::{connection::Database, helpers::parse_datetime, models::ClosureLog},
    tracking::ClosureEvent,
};

fn row_to_closure_log(row: &Row) -> Result<ClosureLog> {
    let start_time: String = row.get("start_time")?;
    let end_time: String = row.get("end_time")?;
    let logged_at: String = row.get("logged_at")?;

    Ok(ClosureLog {
        id: row.get("id")?,
        employee_id: row.get("employee_id")?,
        session_id: row.get("session_id")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: parse_datetime(&end_time, "end_time")?,
        duration_secs: row.get("duration_secs")?,
        logged_at: parse_datetime(&logged_at, "logged_at")?,
    })
}

impl Database {
    pub async fn insert_closure_log(
        &self,
        employee_id: i64,
        session_id: Option<&str>,
        event: &ClosureEvent,
        logged_at: DateTime<Utc>,
    ) -> Result<i64> {
        let session_id = session_id.map(str::to_string);
        let event = event.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO closure_logs (employee_id, session_id, start_time, end_time, duration_secs, logged_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    employee_id,
                    session_id,
                    event.start.to_rfc3339(),
                    event.end.to_rfc3339(),
                    event.duration_secs,
                    logged_at.to_rfc3339(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn get_closure_logs(&self, employee_id: i64) -> Result<Vec<ClosureLog>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, employee_id, session_id, start_time, end_time, duration_secs, logged_at
                 FROM closure_logs
                 WHERE employee_id = ?1
                 ORDER BY start_time ASC, id ASC",
            )?;

            let mut rows = stmt.query(params![employee_id])?;
            let mut logs = Vec::new();
            while let Some(row) = rows.next()? {
                logs.push(row_to_closure_log(row)?);
            }
            Ok(logs)
        })
        .await
    }

    /// Sum of logged closure time for one monitoring session.
    pub async fn total_closed_secs(&self, session_id: &str) -> Result<f64> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let total: f64 = conn.query_row(
                "SELECT COALESCE(SUM(duration_secs), 0.0) FROM closure_logs WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;
            Ok(total)
        })
        .await
    }
}

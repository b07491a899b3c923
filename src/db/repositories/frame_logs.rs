use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{connection::Database, helpers::parse_datetime, models::FrameLog};

fn row_to_frame_log(row: &Row) -> Result<FrameLog> {
    let captured_at: String = row.get("captured_at")?;

    Ok(FrameLog {
        id: row.get("id")?,
        employee_id: row.get("employee_id")?,
        frame_path: row.get("frame_path")?,
        captured_at: parse_datetime(&captured_at, "captured_at")?,
    })
}

impl Database {
    pub async fn insert_frame_log(
        &self,
        employee_id: i64,
        frame_path: &str,
        captured_at: DateTime<Utc>,
    ) -> Result<i64> {
        let frame_path = frame_path.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO frame_logs (employee_id, frame_path, captured_at)
                 VALUES (?1, ?2, ?3)",
                params![employee_id, frame_path, captured_at.to_rfc3339()],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn get_frame_logs(&self, employee_id: i64) -> Result<Vec<FrameLog>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, employee_id, frame_path, captured_at
                 FROM frame_logs
                 WHERE employee_id = ?1
                 ORDER BY captured_at ASC, id ASC",
            )?;

            let mut rows = stmt.query(params![employee_id])?;
            let mut logs = Vec::new();
            while let Some(row) = rows.next()? {
                logs.push(row_to_frame_log(row)?);
            }
            Ok(logs)
        })
        .await
    }
}

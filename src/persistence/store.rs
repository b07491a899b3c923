use anyhow::Result;
use chrono::{DateTime, Utc};
use std::{
    future::Future,
    path::{Path, PathBuf},
};

use crate::{db::Database, tracking::ClosureEvent};

/// Durable sink for productivity data. Callers never assume success.
pub trait ProductivityStore: Send + Sync + 'static {
    fn log_closure(
        &self,
        identity_id: i64,
        session_id: Option<String>,
        event: ClosureEvent,
    ) -> impl Future<Output = Result<()>> + Send;

    fn log_frame_reference(
        &self,
        identity_id: i64,
        path: PathBuf,
        captured_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl ProductivityStore for Database {
    async fn log_closure(&self, identity_id: i64, session_id: Option<String>, event: ClosureEvent) -> Result<()> {
        self.insert_closure_log(identity_id, session_id.as_deref(), &event, Utc::now())
            .await
            .map(|_| ())
    }

    async fn log_frame_reference(&self, identity_id: i64, path: PathBuf, captured_at: DateTime<Utc>) -> Result<()> {
        self.insert_frame_log(identity_id, &path.to_string_lossy(), captured_at)
            .await
            .map(|_| ())
    }
}

/// `<dir>/emp_<id>_<YYYYmmdd_HHMMSS>.jpg`
pub fn frame_path(dir: &Path, identity_id: i64, captured_at: DateTime<Utc>) -> PathBuf {
    dir.join(format!(
        "emp_{identity_id}_{}.jpg",
        captured_at.format("%Y%m%d_%H%M%S")
    ))
}

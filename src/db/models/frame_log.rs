use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrameLog {
    pub id: i64,
    pub employee_id: i64,
    pub frame_path: String,
    pub captured_at: DateTime<Utc>,
}

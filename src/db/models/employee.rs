use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: i64,
    pub name: String,
    /// Raw embedding as enrolled; the gallery normalizes its own copy.
    pub embedding: Vec<f32>,
    pub face_image_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Classroom profile a teacher fills in during onboarding. All fields are
/// named and typed; handlers never pass raw JSON maps between layers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TeacherProfile {
    #[serde(default)]
    pub specializations: Vec<String>,
    #[serde(default)]
    pub teaching_style: String,
    #[serde(default)]
    pub available_time: String,
    #[serde(default)]
    pub facilities: Vec<String>,
    #[serde(default)]
    pub language: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub uid: String,
    pub name: String,
    pub email: String,
    pub is_registered: bool,
    pub is_profile_complete: bool,
    pub created_at_ms: i64,
    #[serde(default)]
    pub profile: Option<TeacherProfile>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub created_at_ms: i64,
    #[serde(default)]
    pub is_ai_generated: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub grade: String,
    pub age: u8,
    #[serde(default)]
    pub preferred_learning_style: String,
    #[serde(default)]
    pub special_needs_or_accommodations: String,
    #[serde(default)]
    pub additional_notes: String,
    #[serde(default)]
    pub summary: String,
    /// Owning teacher.
    pub user_id: String,
}

/// One scheduled activity inside a plan day.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub time: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub status: String,
    pub icon: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Day {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub activities: Vec<Activity>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePlan {
    pub id: String,
    pub user_id: String,
    pub days: Vec<Day>,
    pub created_at_ms: i64,
}

/// Body of `POST /api/chat/stream`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatStreamRequest {
    pub message: String,
    pub user_id: String,
}

/// Milliseconds since the Unix epoch; also the basis for generated ids.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

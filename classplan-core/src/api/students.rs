use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{ClassplanError, CoreResult};
use crate::model::{Student, now_ms};

use super::{AppState, require_user};

/// `GET /api/students` — the caller's roster.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> CoreResult<Json<Vec<Student>>> {
    let auth = require_user(&state, &headers).await?;
    let docs = state
        .store
        .query_eq("students", "userId", &Value::String(auth.uid))
        .await?;
    let mut students = Vec::with_capacity(docs.len());
    for doc in docs {
        match serde_json::from_value::<Student>(doc) {
            Ok(s) => students.push(s),
            Err(err) => tracing::warn!(%err, "skipping unreadable student record"),
        }
    }
    students.sort_by(|a, b| a.last_name.cmp(&b.last_name).then(a.first_name.cmp(&b.first_name)));
    Ok(Json(students))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDraft {
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
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(draft): Json<StudentDraft>,
) -> CoreResult<Json<Student>> {
    let auth = require_user(&state, &headers).await?;
    if draft.first_name.trim().is_empty() || draft.last_name.trim().is_empty() {
        return Err(ClassplanError::Validation(
            "first and last name are required".into(),
        ));
    }
    if draft.grade.trim().is_empty() {
        return Err(ClassplanError::Validation("grade is required".into()));
    }

    let student = Student {
        id: now_ms().to_string(),
        first_name: draft.first_name.trim().to_string(),
        last_name: draft.last_name.trim().to_string(),
        grade: draft.grade.trim().to_string(),
        age: draft.age,
        preferred_learning_style: draft.preferred_learning_style,
        special_needs_or_accommodations: draft.special_needs_or_accommodations,
        additional_notes: draft.additional_notes,
        summary: draft.summary,
        user_id: auth.uid,
    };
    let doc = serde_json::to_value(&student).map_err(|e| ClassplanError::Other(e.into()))?;
    state.store.set("students", &student.id, doc).await?;
    Ok(Json(student))
}

/// Load a student and check the caller owns it. Someone else's student is
/// reported as absent, not forbidden.
async fn load_owned(state: &AppState, uid: &str, id: &str) -> CoreResult<Student> {
    let doc = state
        .store
        .get("students", id)
        .await?
        .ok_or_else(|| ClassplanError::NotFound {
            collection: "students".into(),
            id: id.into(),
        })?;
    let student: Student =
        serde_json::from_value(doc).map_err(|e| ClassplanError::Other(e.into()))?;
    if student.user_id != uid {
        return Err(ClassplanError::NotFound {
            collection: "students".into(),
            id: id.into(),
        });
    }
    Ok(student)
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(patch): Json<Value>,
) -> CoreResult<Json<Student>> {
    let auth = require_user(&state, &headers).await?;
    load_owned(&state, &auth.uid, &id).await?;

    let mut patch = match patch {
        Value::Object(fields) => fields,
        _ => {
            return Err(ClassplanError::Validation(
                "student update must be a JSON object".into(),
            ));
        }
    };
    // Identity and ownership are not patchable.
    patch.remove("id");
    patch.remove("userId");

    state
        .store
        .update("students", &id, Value::Object(patch))
        .await?;
    Ok(Json(load_owned(&state, &auth.uid, &id).await?))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> CoreResult<Json<Value>> {
    let auth = require_user(&state, &headers).await?;
    load_owned(&state, &auth.uid, &id).await?;
    state.store.delete("students", &id).await?;
    Ok(Json(json!({ "deleted": true })))
}

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::json;

use crate::error::{ClassplanError, CoreResult};
use crate::model::{Task, TeacherProfile, UserRecord, now_ms};
use crate::planner;

use super::{AppState, require_self, require_user};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
}

async fn load_user(state: &AppState, uid: &str) -> CoreResult<UserRecord> {
    let doc = state
        .store
        .get("users", uid)
        .await?
        .ok_or_else(|| ClassplanError::NotFound {
            collection: "users".into(),
            id: uid.into(),
        })?;
    serde_json::from_value(doc).map_err(|e| ClassplanError::Other(e.into()))
}

async fn save_tasks(state: &AppState, uid: &str, tasks: &[Task]) -> CoreResult<()> {
    state
        .store
        .update("users", uid, json!({ "tasks": tasks }))
        .await
}

/// `POST /api/users/register` — create the caller's user document.
/// Registering twice returns the existing record unchanged.
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> CoreResult<Json<UserRecord>> {
    let auth = require_user(&state, &headers).await?;
    if req.name.trim().is_empty() || req.email.trim().is_empty() {
        return Err(ClassplanError::Validation(
            "name and email are required".into(),
        ));
    }

    if let Some(existing) = state.store.get("users", &auth.uid).await? {
        let user = serde_json::from_value(existing).map_err(|e| ClassplanError::Other(e.into()))?;
        return Ok(Json(user));
    }

    let user = UserRecord {
        uid: auth.uid.clone(),
        name: req.name.trim().to_string(),
        email: req.email.trim().to_string(),
        is_registered: false,
        is_profile_complete: false,
        created_at_ms: now_ms(),
        profile: None,
        tasks: Vec::new(),
    };
    let doc = serde_json::to_value(&user).map_err(|e| ClassplanError::Other(e.into()))?;
    state.store.set("users", &auth.uid, doc).await?;
    tracing::info!(uid = %auth.uid, "registered user");
    Ok(Json(user))
}

/// `PUT /api/users/:uid/profile` — attach or replace the classroom profile.
pub async fn update_profile(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    headers: HeaderMap,
    Json(profile): Json<TeacherProfile>,
) -> CoreResult<Json<UserRecord>> {
    require_self(&state, &headers, &uid).await?;
    state
        .store
        .update("users", &uid, json!({ "profile": profile }))
        .await?;
    Ok(Json(load_user(&state, &uid).await?))
}

pub async fn complete_registration(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    headers: HeaderMap,
) -> CoreResult<Json<UserRecord>> {
    require_self(&state, &headers, &uid).await?;
    state
        .store
        .update("users", &uid, json!({ "isRegistered": true }))
        .await?;
    Ok(Json(load_user(&state, &uid).await?))
}

pub async fn complete_profile(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    headers: HeaderMap,
) -> CoreResult<Json<UserRecord>> {
    require_self(&state, &headers, &uid).await?;
    state
        .store
        .update("users", &uid, json!({ "isProfileComplete": true }))
        .await?;
    Ok(Json(load_user(&state, &uid).await?))
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    headers: HeaderMap,
) -> CoreResult<Json<Vec<Task>>> {
    require_self(&state, &headers, &uid).await?;
    Ok(Json(load_user(&state, &uid).await?.tasks))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub status: String,
}

pub async fn add_task(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    headers: HeaderMap,
    Json(draft): Json<TaskDraft>,
) -> CoreResult<Json<Task>> {
    require_self(&state, &headers, &uid).await?;
    if draft.title.trim().is_empty() {
        return Err(ClassplanError::Validation("task title is required".into()));
    }

    let mut user = load_user(&state, &uid).await?;
    let task = Task {
        id: now_ms().to_string(),
        title: draft.title.trim().to_string(),
        kind: if draft.kind.is_empty() { "general".into() } else { draft.kind },
        status: if draft.status.is_empty() { "pending".into() } else { draft.status },
        created_at_ms: now_ms(),
        is_ai_generated: false,
    };
    user.tasks.push(task.clone());
    save_tasks(&state, &uid, &user.tasks).await?;
    Ok(Json(task))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<String>,
}

pub async fn update_task(
    State(state): State<AppState>,
    Path((uid, task_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(patch): Json<TaskPatch>,
) -> CoreResult<Json<Task>> {
    require_self(&state, &headers, &uid).await?;
    let mut user = load_user(&state, &uid).await?;
    let task = user
        .tasks
        .iter_mut()
        .find(|t| t.id == task_id)
        .ok_or_else(|| ClassplanError::NotFound {
            collection: "tasks".into(),
            id: task_id.clone(),
        })?;
    if let Some(title) = patch.title {
        task.title = title;
    }
    if let Some(kind) = patch.kind {
        task.kind = kind;
    }
    if let Some(status) = patch.status {
        task.status = status;
    }
    let updated = task.clone();
    save_tasks(&state, &uid, &user.tasks).await?;
    Ok(Json(updated))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path((uid, task_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> CoreResult<Json<serde_json::Value>> {
    require_self(&state, &headers, &uid).await?;
    let mut user = load_user(&state, &uid).await?;
    let before = user.tasks.len();
    user.tasks.retain(|t| t.id != task_id);
    if user.tasks.len() == before {
        return Err(ClassplanError::NotFound {
            collection: "tasks".into(),
            id: task_id,
        });
    }
    save_tasks(&state, &uid, &user.tasks).await?;
    Ok(Json(json!({ "deleted": true })))
}

/// `POST /api/users/:uid/tasks/generate` — model-suggested tasks, appended
/// to the user's list. Generation failures degrade to the starter set, so
/// this endpoint does not fail when the model does.
pub async fn generate_tasks(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    headers: HeaderMap,
) -> CoreResult<Json<Vec<Task>>> {
    require_self(&state, &headers, &uid).await?;
    let mut user = load_user(&state, &uid).await?;
    let ctx = planner::gather_context(state.store.as_ref(), &uid).await?;
    let generated = planner::generate_tasks(state.source.as_ref(), &ctx).await;
    user.tasks.extend(generated.iter().cloned());
    save_tasks(&state, &uid, &user.tasks).await?;
    Ok(Json(generated))
}

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ClassplanError, CoreResult};
use crate::model::{SchedulePlan, now_ms};
use crate::planner;

use super::{AppState, require_user};

/// `GET /api/schedules` — stored plans for the caller, newest first.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> CoreResult<Json<Vec<SchedulePlan>>> {
    let auth = require_user(&state, &headers).await?;
    let docs = state
        .store
        .query_eq("schedules", "userId", &Value::String(auth.uid))
        .await?;
    let mut plans = Vec::with_capacity(docs.len());
    for doc in docs {
        match serde_json::from_value::<SchedulePlan>(doc) {
            Ok(p) => plans.push(p),
            Err(err) => tracing::warn!(%err, "skipping unreadable schedule"),
        }
    }
    plans.sort_by_key(|p| std::cmp::Reverse(p.created_at_ms));
    Ok(Json(plans))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub message: String,
}

/// `POST /api/schedules/generate` — one-shot completion, formatted into a
/// typed weekly plan and stored. Unlike the chat stream this endpoint is
/// request/response; a model failure is an ordinary error status.
pub async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GenerateRequest>,
) -> CoreResult<Json<SchedulePlan>> {
    let auth = require_user(&state, &headers).await?;
    let ctx = planner::gather_context(state.store.as_ref(), &auth.uid).await?;

    let message = if req.message.trim().is_empty() {
        "Create a weekly schedule for my classroom as a JSON array of day \
         objects with fields: name, status, activities (time, title, \
         description, category, status, icon). Reply with JSON only."
            .to_string()
    } else {
        req.message
    };
    let prompt = planner::build_prompt(&message, &ctx)?;
    let reply = state.source.complete(&prompt).await?;
    let days = planner::extract_plan(&reply)?;

    let plan = SchedulePlan {
        id: now_ms().to_string(),
        user_id: auth.uid,
        days,
        created_at_ms: now_ms(),
    };
    let doc = serde_json::to_value(&plan).map_err(|e| ClassplanError::Other(e.into()))?;
    state.store.set("schedules", &plan.id, doc).await?;
    tracing::info!(plan_id = %plan.id, days = plan.days.len(), "stored generated schedule");
    Ok(Json(plan))
}

use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;

use crate::error::CoreResult;
use crate::generate::FragmentStream;
use crate::model::ChatStreamRequest;
use crate::planner;
use crate::sse::encode_stream;

use super::{AppState, require_self};

/// `POST /api/chat/stream`.
///
/// Authentication happens before the response is committed, so a bad token
/// is an ordinary 401. Everything after that point is 200 with failures
/// delivered in-band: once streaming headers go out there is no status left
/// to change.
pub async fn stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatStreamRequest>,
) -> Response {
    if let Err(err) = require_self(&state, &headers, &req.user_id).await {
        return err.into_response();
    }

    let fragments = match start_generation(&state, &req).await {
        Ok(fragments) => fragments,
        Err(err) => futures::stream::once(async move { Err(err) }).boxed(),
    };

    let response_headers = [
        ("Content-Type", "text/event-stream"),
        ("Cache-Control", "no-cache"),
        ("Connection", "keep-alive"),
        // Disable proxy buffering; fragments must reach the client as written.
        ("X-Accel-Buffering", "no"),
    ];
    (response_headers, Body::from_stream(encode_stream(fragments))).into_response()
}

async fn start_generation(
    state: &AppState,
    req: &ChatStreamRequest,
) -> CoreResult<FragmentStream> {
    let ctx = planner::gather_context(state.store.as_ref(), &req.user_id).await?;
    let prompt = planner::build_prompt(&req.message, &ctx)?;
    tracing::debug!(
        user_id = %req.user_id,
        source = state.source.name(),
        prompt_chars = prompt.len(),
        "starting chat stream"
    );
    state.source.stream(&prompt).await
}

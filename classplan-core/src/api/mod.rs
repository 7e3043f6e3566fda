//! HTTP surface. Handlers are thin: verify the caller, validate the body,
//! delegate to the store/planner, and let `ClassplanError` render itself.

pub mod chat;
pub mod schedules;
pub mod students;
pub mod users;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{AuthUser, TokenVerifier};
use crate::config::Config;
use crate::error::{ClassplanError, CoreResult};
use crate::generate::GenerationSource;
use crate::store::DocumentStore;

/// Process-wide collaborators, wired once at startup.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub source: Arc<dyn GenerationSource>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub cfg: Config,
}

impl IntoResponse for ClassplanError {
    fn into_response(self) -> Response {
        let status = match &self {
            ClassplanError::Validation(_) => StatusCode::BAD_REQUEST,
            ClassplanError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ClassplanError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

fn bearer_token(headers: &HeaderMap) -> CoreResult<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ClassplanError::Unauthorized("missing bearer token".into()))
}

/// Resolve the caller's identity from the Authorization header.
pub async fn require_user(state: &AppState, headers: &HeaderMap) -> CoreResult<AuthUser> {
    let token = bearer_token(headers)?;
    state.verifier.verify(token).await
}

/// The caller must be the user the path names.
pub async fn require_self(
    state: &AppState,
    headers: &HeaderMap,
    uid: &str,
) -> CoreResult<AuthUser> {
    let user = require_user(state, headers).await?;
    if user.uid != uid {
        return Err(ClassplanError::Unauthorized(
            "token does not match requested user".into(),
        ));
    }
    Ok(user)
}

async fn health() -> &'static str {
    "ok"
}

pub fn router(state: AppState) -> Router {
    let cors = match &state.cfg.server.cors_allow_origin {
        Some(origin) => {
            let allowed = origin
                .parse::<HeaderValue>()
                .map(tower_http::cors::AllowOrigin::exact)
                .unwrap_or_else(|_| tower_http::cors::AllowOrigin::any());
            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/users/register", post(users::register))
        .route("/api/users/:uid/profile", put(users::update_profile))
        .route(
            "/api/users/:uid/complete-registration",
            post(users::complete_registration),
        )
        .route(
            "/api/users/:uid/complete-profile",
            post(users::complete_profile),
        )
        .route(
            "/api/users/:uid/tasks",
            get(users::list_tasks).post(users::add_task),
        )
        .route(
            "/api/users/:uid/tasks/:task_id",
            put(users::update_task).delete(users::delete_task),
        )
        .route("/api/users/:uid/tasks/generate", post(users::generate_tasks))
        .route(
            "/api/students",
            get(students::list).post(students::create),
        )
        .route(
            "/api/students/:id",
            put(students::update).delete(students::remove),
        )
        .route("/api/schedules", get(schedules::list))
        .route("/api/schedules/generate", post(schedules::generate))
        .route("/api/chat/stream", post(chat::stream))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until ctrl-c or SIGTERM.
pub async fn serve(state: AppState) -> CoreResult<()> {
    let addr = state.cfg.server.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(%err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => tracing::error!(%err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::StaticTokenVerifier;
    use crate::client::StreamChatClient;
    use crate::generate::CannedSource;
    use crate::http_client::HttpClient;
    use crate::store::MemoryStore;

    /// Serve the full router on an ephemeral port; returns its base URL.
    pub(crate) async fn spawn_app(source: Arc<dyn GenerationSource>) -> (String, AppState) {
        let state = AppState {
            store: Arc::new(MemoryStore::new()),
            source,
            verifier: Arc::new(StaticTokenVerifier::default().with_token("tok-1", "t1")),
            cfg: Config::default(),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (base, state)
    }

    #[tokio::test]
    async fn chat_stream_round_trip_delivers_chunks_in_order() {
        let (base, _state) =
            spawn_app(Arc::new(CannedSource::new(["Monday: ", "Math 9am"]))).await;

        let client = StreamChatClient::new(HttpClient::new_default().unwrap(), &base)
            .with_bearer_token("tok-1");
        let mut chunks = Vec::new();
        let mut cb = |c: &str| chunks.push(c.to_string());
        let outcome = client.stream_chat("plan my week", "t1", &mut cb).await;

        assert_eq!(chunks, vec!["Monday: ", "Math 9am"]);
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn chat_stream_upstream_failure_is_in_band_after_partial_content() {
        let (base, _state) = spawn_app(Arc::new(CannedSource::failing(
            ["partial"],
            "quota exhausted",
        )))
        .await;

        let client = StreamChatClient::new(HttpClient::new_default().unwrap(), &base)
            .with_bearer_token("tok-1");
        let mut chunks = Vec::new();
        let mut cb = |c: &str| chunks.push(c.to_string());
        let outcome = client.stream_chat("plan my week", "t1", &mut cb).await;

        assert_eq!(chunks, vec!["partial"]);
        match outcome {
            Err(ClassplanError::Generation(msg)) => assert_eq!(msg, "quota exhausted"),
            other => panic!("expected Generation error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn chat_stream_without_token_is_rejected_before_streaming() {
        let (base, _state) = spawn_app(Arc::new(CannedSource::new(["never"]))).await;

        let client = StreamChatClient::new(HttpClient::new_default().unwrap(), &base);
        let mut cb = |_: &str| panic!("no chunks expected");
        let outcome = client.stream_chat("plan my week", "t1", &mut cb).await;

        match outcome {
            Err(ClassplanError::ServerStatus { status, .. }) => assert_eq!(status, 401),
            other => panic!("expected ServerStatus 401, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let (base, _state) = spawn_app(Arc::new(CannedSource::new(["x"]))).await;
        let body = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "ok");
    }
}

use crate::error::CoreResult;
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::ChatStreamRequest;
use crate::sse::StreamParser;

use futures_util::StreamExt;

/// Client side of `POST /api/chat/stream`.
///
/// Fragments are handed to the caller's callback as soon as their protocol
/// line completes; the returned result is the stream's single terminal
/// outcome. An in-band `event: error` after partial content still delivers
/// the partial chunks first, then settles as `Err`.
pub struct StreamChatClient {
    http: HttpClient,
    base: String,
    bearer_token: Option<String>,
}

impl StreamChatClient {
    pub fn new(http: HttpClient, base: impl Into<String>) -> Self {
        Self {
            http,
            base: base.into(),
            bearer_token: None,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub async fn stream_chat(
        &self,
        message: &str,
        user_id: &str,
        on_chunk: &mut dyn FnMut(&str),
    ) -> CoreResult<()> {
        let url = format!("{}/api/chat/stream", self.base);
        let body = ChatStreamRequest {
            message: message.to_string(),
            user_id: user_id.to_string(),
        };
        let auth_header;
        let mut headers: Vec<(&str, &str)> = Vec::new();
        if let Some(token) = &self.bearer_token {
            auth_header = format!("Bearer {token}");
            headers.push(("Authorization", auth_header.as_str()));
        }

        let mut lines = self
            .http
            .post_sse_lines(&url, &body, &headers, &RequestCtx::default())
            .await?;

        let mut parser = StreamParser::new();
        while let Some(line) = lines.next().await {
            parser.push_line(&line?, on_chunk);
        }
        parser.finish(on_chunk)
    }
}

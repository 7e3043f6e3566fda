use std::time::Instant;

use reqwest::{Client, StatusCode};
use serde::{Serialize, de::DeserializeOwned};

use crate::config::HttpCfg;
use crate::error::{ClassplanError, CoreResult};
use crate::sse::LineAssembler;

/// Request context carries an optional request id for correlation.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
}

/// A boxed stream of reconstructed protocol lines.
pub type LineStreamBox =
    std::pin::Pin<Box<dyn futures_util::stream::Stream<Item = CoreResult<String>> + Send>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(std::time::Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(std::time::Duration::from_millis(cfg.request_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| ClassplanError::Setup(format!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: "classplan/0.1".to_string(),
        })
    }

    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<(R, u32)> {
        let start = Instant::now();
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }

        let resp = req.send().await.map_err(map_send_error)?;
        let latency = start.elapsed().as_millis() as u32;
        let status = resp.status();

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(map_status_error(status, &text));
        }

        let parsed = resp.json::<R>().await.map_err(|e| ClassplanError::ServerStatus {
            status: status.as_u16(),
            message: format!("json decode error: {e}"),
        })?;
        Ok((parsed, latency))
    }

    /// POST JSON and return the response body as a stream of reconstructed
    /// lines. Reads may arrive at arbitrary, non-line-aligned boundaries;
    /// the assembler holds partial lines across reads and flushes the
    /// unterminated tail when the body ends.
    pub async fn post_sse_lines<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<LineStreamBox> {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "text/event-stream");
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }

        let resp = req.send().await.map_err(map_send_error)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(map_status_error(status, &text));
        }

        let byte_stream = resp.bytes_stream();
        Ok(Box::pin(LineStream::new(Box::pin(byte_stream))))
    }
}

fn map_send_error(e: reqwest::Error) -> ClassplanError {
    if e.is_builder() {
        ClassplanError::Setup(e.to_string())
    } else {
        // Sent (or attempted) but nothing came back: connect failure,
        // timeout, or a dropped connection.
        ClassplanError::NoResponse
    }
}

/// Non-2xx classification. Prefers the structured JSON body (`error` or
/// `message` field) the way the API surface emits it; falls back to a
/// generic message carrying the status code.
fn map_status_error(status: StatusCode, body: &str) -> ClassplanError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("server error: status {}", status.as_u16()));
    ClassplanError::ServerStatus {
        status: status.as_u16(),
        message,
    }
}

/// Decode the longest complete-UTF-8 prefix of `buf`, leaving a truncated
/// trailing sequence (at most 3 bytes) in place for the next read. Network
/// reads split at arbitrary byte offsets, including inside a multi-byte
/// character.
fn take_complete_utf8(buf: &mut Vec<u8>) -> String {
    match std::str::from_utf8(buf) {
        Ok(s) => {
            let text = s.to_string();
            buf.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let text = String::from_utf8_lossy(&buf[..valid]).into_owned();
            buf.drain(..valid);
            text
        }
        Err(_) => {
            // Invalid bytes mid-buffer, not a split: replace and move on.
            let text = String::from_utf8_lossy(buf).into_owned();
            buf.clear();
            text
        }
    }
}

/// Internal line splitter over a bytes stream, built on [`LineAssembler`].
struct LineStream {
    inner: std::pin::Pin<
        Box<dyn futures_util::stream::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
    >,
    assembler: LineAssembler,
    pending: std::collections::VecDeque<String>,
    /// Truncated UTF-8 sequence carried across reads.
    partial: Vec<u8>,
    done: bool,
}

impl LineStream {
    fn new(
        inner: std::pin::Pin<
            Box<
                dyn futures_util::stream::Stream<Item = Result<bytes::Bytes, reqwest::Error>>
                    + Send,
            >,
        >,
    ) -> Self {
        Self {
            inner,
            assembler: LineAssembler::new(),
            pending: std::collections::VecDeque::new(),
            partial: Vec::new(),
            done: false,
        }
    }
}

impl futures_util::stream::Stream for LineStream {
    type Item = CoreResult<String>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Poll::Ready(Some(Ok(line)));
            }
            if self.done {
                return match self.assembler.finish() {
                    Some(tail) => Poll::Ready(Some(Ok(tail))),
                    None => Poll::Ready(None),
                };
            }
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.partial.extend_from_slice(&chunk);
                    let text = take_complete_utf8(&mut self.partial);
                    let lines = self.assembler.push_delta(&text);
                    self.pending.extend(lines);
                }
                Poll::Ready(Some(Err(_e))) => {
                    return Poll::Ready(Some(Err(ClassplanError::NoResponse)));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    if !self.partial.is_empty() {
                        // The body ended mid-character; decode best-effort.
                        let text = String::from_utf8_lossy(&self.partial).into_owned();
                        self.partial.clear();
                        let lines = self.assembler.push_delta(&text);
                        self.pending.extend(lines);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

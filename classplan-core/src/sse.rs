//! Wire format shared by the chat-stream emitter and consumer.
//!
//! Contract:
//! - The emitter writes one `data:` line per generation fragment, in arrival
//!   order, followed by a blank separator line. Nothing is coalesced.
//! - An upstream failure becomes `event: error` plus a `data:` line carrying
//!   the message, then the stream ends. The HTTP status was committed when
//!   the stream began, so errors are always in-band.
//! - The consumer reconstructs complete lines from arbitrarily fragmented
//!   reads, dispatches each `content` chunk exactly once, in order, and
//!   settles exactly one terminal outcome.

use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::error::{ClassplanError, CoreResult};
use crate::generate::FragmentStream;

pub const DATA_PREFIX: &str = "data: ";
pub const ERROR_EVENT_LINE: &str = "event: error";

/// Payload of a `data:` line. Content chunks carry `content`; the line
/// following `event: error` carries `message`. Unknown fields are ignored
/// so the format can grow without breaking older consumers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct DataPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One content fragment as it goes on the wire. serde_json takes care of
/// escaping quotes and embedded newlines inside the fragment.
pub fn encode_chunk(fragment: &str) -> String {
    format!("{DATA_PREFIX}{}\n\n", serde_json::json!({ "content": fragment }))
}

/// The two-line error form. Used for every failure after the response has
/// been committed, including failures before the first fragment.
pub fn encode_error(message: &str) -> String {
    format!(
        "{ERROR_EVENT_LINE}\n{DATA_PREFIX}{}\n\n",
        serde_json::json!({ "message": message })
    )
}

/// Convert a fragment stream into the body bytes of the chat response.
///
/// Each `Ok` fragment is emitted as its own `data:` line the moment it
/// arrives. The first `Err` is emitted in the error form and terminates the
/// stream; anything after it is dropped. If the client has gone away, axum
/// drops the body stream and the emitter aborts quietly.
pub fn encode_stream(
    fragments: FragmentStream,
) -> impl futures_util::Stream<Item = Result<Bytes, std::convert::Infallible>> + Send {
    fragments
        .map(|item| match item {
            Ok(fragment) => (Bytes::from(encode_chunk(&fragment)), false),
            Err(err) => (Bytes::from(encode_error(&err.to_string())), true),
        })
        .scan(false, |done, (bytes, terminal)| {
            let out = if *done {
                None
            } else {
                *done = terminal;
                Some(Ok(bytes))
            };
            futures_util::future::ready(out)
        })
}

/// Reconstructs complete protocol lines from a stream of partial reads.
///
/// Owned by exactly one in-flight request and driven sequentially; there is
/// no concurrency within a stream's lifetime, so no locking. A trailing
/// fragment without `\n` is held back until more input arrives or
/// [`LineAssembler::finish`] flushes it as a final best-effort line.
#[derive(Debug, Default)]
pub struct LineAssembler {
    /// Bytes of cumulative input already folded into `buffer`. Monotone;
    /// only meaningful for the cumulative-text entry point.
    consumed: usize,
    /// Tail of input not yet resolved into complete lines.
    buffer: String,
    flushed: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the full cumulative text received so far, for transports that
    /// only expose the entire body-so-far on each progress notification.
    /// Only the unseen suffix is folded in; the offset never moves backwards.
    pub fn push_cumulative(&mut self, cumulative: &str) -> Vec<String> {
        let start = self.consumed.min(cumulative.len());
        let delta = cumulative[start..].to_string();
        self.consumed = start;
        self.push_delta(&delta)
    }

    /// Feed newly received text. Returns every line completed by this call,
    /// in order; the unterminated remainder stays buffered.
    pub fn push_delta(&mut self, delta: &str) -> Vec<String> {
        self.consumed += delta.len();
        self.buffer.push_str(delta);

        let mut lines = Vec::new();
        while let Some(idx) = self.buffer.find('\n') {
            let mut line: String = self.buffer.drain(..=idx).collect();
            line.pop(); // the '\n'
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Flush the unterminated tail once the stream has ended. Idempotent:
    /// a second call returns `None`, so an already-terminated stream never
    /// produces a duplicate line.
    pub fn finish(&mut self) -> Option<String> {
        if self.flushed {
            return None;
        }
        self.flushed = true;
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

/// Consumer-side protocol state machine.
///
/// Feed it raw deltas (or whole reconstructed lines) and a chunk callback;
/// then call [`StreamParser::finish`] exactly once when the transport
/// reports completion to obtain the terminal outcome. Chunks already
/// delivered are never retracted, even when the outcome is an error.
#[derive(Debug, Default)]
pub struct StreamParser {
    assembler: LineAssembler,
    error_event_seen: bool,
    error_message: Option<String>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process newly received raw text.
    pub fn push_delta(&mut self, delta: &str, on_chunk: &mut dyn FnMut(&str)) {
        for line in self.assembler.push_delta(delta) {
            self.push_line(&line, on_chunk);
        }
    }

    /// Process the full cumulative text received so far (see
    /// [`LineAssembler::push_cumulative`]).
    pub fn push_cumulative(&mut self, cumulative: &str, on_chunk: &mut dyn FnMut(&str)) {
        for line in self.assembler.push_cumulative(cumulative) {
            self.push_line(&line, on_chunk);
        }
    }

    /// Process one complete protocol line. Public so callers whose transport
    /// already yields whole lines can skip the assembler.
    pub fn push_line(&mut self, line: &str, on_chunk: &mut dyn FnMut(&str)) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        if let Some(rest) = trimmed.strip_prefix(DATA_PREFIX) {
            let json = rest.trim();
            if json.is_empty() {
                return;
            }
            match serde_json::from_str::<DataPayload>(json) {
                Ok(payload) => {
                    if let Some(content) = payload.content {
                        on_chunk(&content);
                    }
                    if let Some(message) = payload.message {
                        self.error_message = Some(message);
                    }
                }
                Err(err) => {
                    // A malformed line is skipped, never fatal to the stream.
                    tracing::warn!(%err, line = %trimmed, "skipping malformed data line");
                }
            }
        } else if trimmed.starts_with(ERROR_EVENT_LINE) {
            // Records attribution; the accompanying data line carries the
            // message and is handled by the branch above.
            self.error_event_seen = true;
        }
        // Other event types are ignored for forward compatibility.
    }

    /// Flush the unterminated tail (at most once) and settle the outcome.
    /// A stream that ends without an error event is a success even if it
    /// delivered zero chunks.
    pub fn finish(&mut self, on_chunk: &mut dyn FnMut(&str)) -> CoreResult<()> {
        if let Some(tail) = self.assembler.finish() {
            self.push_line(&tail, on_chunk);
        }
        if self.error_event_seen {
            let message = self
                .error_message
                .take()
                .unwrap_or_else(|| "generation stream reported an error".to_string());
            return Err(ClassplanError::Generation(message));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn collect_chunks(deliveries: &[&str]) -> (Vec<String>, CoreResult<()>) {
        let mut parser = StreamParser::new();
        let mut chunks = Vec::new();
        let mut cb = |c: &str| chunks.push(c.to_string());
        for d in deliveries {
            parser.push_delta(d, &mut cb);
        }
        let outcome = parser.finish(&mut cb);
        (chunks, outcome)
    }

    #[test]
    fn chunk_survives_mid_json_split() {
        let (chunks, outcome) = collect_chunks(&["data: {\"content\": \"Hel", "lo\"}\n"]);
        assert_eq!(chunks, vec!["Hello"]);
        assert!(outcome.is_ok());
    }

    #[test]
    fn split_invariance_byte_by_byte() {
        let wire = format!("{}{}", encode_chunk("A"), encode_chunk("B"));
        let mut parser = StreamParser::new();
        let mut chunks = Vec::new();
        let mut cb = |c: &str| chunks.push(c.to_string());
        for i in 0..wire.len() {
            parser.push_delta(&wire[i..i + 1], &mut cb);
        }
        parser.finish(&mut cb).unwrap();
        assert_eq!(chunks, vec!["A", "B"]);
    }

    #[test]
    fn split_invariance_across_arbitrary_boundaries() {
        let wire = format!(
            "{}{}{}",
            encode_chunk("one"),
            encode_chunk("two"),
            encode_chunk("three")
        );
        // Every two-way split of the wire text produces identical output.
        for cut in 0..=wire.len() {
            let (chunks, outcome) = collect_chunks(&[&wire[..cut], &wire[cut..]]);
            assert_eq!(chunks, vec!["one", "two", "three"], "cut at {cut}");
            assert!(outcome.is_ok());
        }
    }

    #[test]
    fn final_flush_is_idempotent_for_terminated_streams() {
        // Last line already ends with '\n': the flush must add nothing.
        let (chunks, outcome) = collect_chunks(&["data: {\"content\": \"done\"}\n"]);
        assert_eq!(chunks, vec!["done"]);
        assert!(outcome.is_ok());

        let mut assembler = LineAssembler::new();
        assembler.push_delta("data: {\"content\": \"x\"}\n");
        assert_eq!(assembler.finish(), None);
        assert_eq!(assembler.finish(), None);
    }

    #[test]
    fn unterminated_tail_is_parsed_once_at_end() {
        // No trailing newline on the last line.
        let (chunks, outcome) = collect_chunks(&["data: {\"content\": \"tail\"}"]);
        assert_eq!(chunks, vec!["tail"]);
        assert!(outcome.is_ok());
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let wire = format!(
            "{}data: {{not json\n{}",
            encode_chunk("good-1"),
            encode_chunk("good-2")
        );
        let (chunks, outcome) = collect_chunks(&[&wire]);
        assert_eq!(chunks, vec!["good-1", "good-2"]);
        assert!(outcome.is_ok());
    }

    #[test]
    fn error_event_settles_as_failure_with_message() {
        let (chunks, outcome) =
            collect_chunks(&["event: error\ndata: {\"message\": \"boom\"}\n"]);
        assert!(chunks.is_empty());
        match outcome {
            Err(ClassplanError::Generation(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected Generation error, got: {other:?}"),
        }
    }

    #[test]
    fn error_event_without_message_gets_generic_text() {
        let (_, outcome) = collect_chunks(&["event: error\n"]);
        match outcome {
            Err(ClassplanError::Generation(msg)) => {
                assert_eq!(msg, "generation stream reported an error");
            }
            other => panic!("expected Generation error, got: {other:?}"),
        }
    }

    #[test]
    fn chunks_before_error_remain_delivered() {
        let wire = format!("{}{}", encode_chunk("partial"), encode_error("boom"));
        let (chunks, outcome) = collect_chunks(&[&wire]);
        assert_eq!(chunks, vec!["partial"]);
        assert!(outcome.is_err());
    }

    #[test]
    fn unknown_event_lines_are_ignored() {
        let wire = format!("event: ping\n: comment\n{}", encode_chunk("ok"));
        let (chunks, outcome) = collect_chunks(&[&wire]);
        assert_eq!(chunks, vec!["ok"]);
        assert!(outcome.is_ok());
    }

    #[test]
    fn cumulative_progress_never_reprocesses_consumed_text() {
        let wire = format!("{}{}", encode_chunk("A"), encode_chunk("B"));
        let mut parser = StreamParser::new();
        let mut chunks = Vec::new();
        let mut cb = |c: &str| chunks.push(c.to_string());
        // The transport reports the whole body-so-far on every notification.
        for end in [5, 5, 12, wire.len(), wire.len()] {
            parser.push_cumulative(&wire[..end], &mut cb);
        }
        parser.finish(&mut cb).unwrap();
        assert_eq!(chunks, vec!["A", "B"]);
    }

    #[test]
    fn crlf_lines_are_handled() {
        let (chunks, outcome) =
            collect_chunks(&["data: {\"content\": \"win\"}\r\n\r\n"]);
        assert_eq!(chunks, vec!["win"]);
        assert!(outcome.is_ok());
    }

    #[test]
    fn encode_chunk_escapes_embedded_newlines() {
        let line = encode_chunk("a\nb \"quoted\"");
        // One protocol line plus the blank separator, nothing more.
        assert_eq!(line.matches('\n').count(), 2);
        let (chunks, _) = collect_chunks(&[&line]);
        assert_eq!(chunks, vec!["a\nb \"quoted\""]);
    }

    #[tokio::test]
    async fn encode_stream_emits_each_fragment_immediately() {
        let fragments: FragmentStream = futures::stream::iter(vec![
            Ok("Monday: ".to_string()),
            Ok("Math 9am".to_string()),
        ])
        .boxed();
        let out: Vec<Bytes> = encode_stream(fragments)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Bytes::from(encode_chunk("Monday: ")));
        assert_eq!(out[1], Bytes::from(encode_chunk("Math 9am")));
    }

    #[tokio::test]
    async fn encode_stream_terminates_after_first_error() {
        let fragments: FragmentStream = futures::stream::iter(vec![
            Ok("one".to_string()),
            Err(ClassplanError::Generation("boom".into())),
            Ok("never".to_string()),
        ])
        .boxed();
        let out: Vec<Bytes> = encode_stream(fragments)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], Bytes::from(encode_error("boom")));
    }
}

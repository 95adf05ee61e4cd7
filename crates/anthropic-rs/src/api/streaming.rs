//! Server-Sent Events (SSE) decoding for streamed Messages API responses.
//!
//! [`EventDecoder`] reads a response body incrementally, frames it into
//! `event:` / `data:` records terminated by a blank line, and turns each record
//! into a typed [`StreamEvent`]. [`EventDecoder::into_stream`] (or [`decode`])
//! wraps it as a lazy [`EventStream`]: nothing is read until the consumer
//! polls, and dropping the stream drops the body.
//!
//! The record's event type alone selects the payload shape ([`decode_record`]).
//! Any malformed, out-of-order or truncated stream ends iteration with an
//! [`Error::Decode`]; records are never skipped.

use std::collections::{BTreeMap, BTreeSet};
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{ApiError, ApiErrorKind, DecodeError, Error, Result};
use crate::types::{ContentBlock, ErrorBody, MessageResponse, StopReason};

/// Lazy, cancellable sequence of decoded events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// A single event from a message stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Keepalive.
    Ping,
    /// The message envelope; `content` is empty at this point.
    MessageStart { message: MessageResponse },
    /// Top-level changes: stop reason and cumulative output usage.
    MessageDelta {
        delta: MessageDelta,
        usage: DeltaUsage,
    },
    /// The stream is complete.
    MessageStop,
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: ContentDelta,
    },
    ContentBlockStop { index: usize },
}

impl StreamEvent {
    /// Wire name of the event type.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Ping => "ping",
            StreamEvent::MessageStart { .. } => "message_start",
            StreamEvent::MessageDelta { .. } => "message_delta",
            StreamEvent::MessageStop => "message_stop",
            StreamEvent::ContentBlockStart { .. } => "content_block_start",
            StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            StreamEvent::ContentBlockStop { .. } => "content_block_stop",
        }
    }
}

/// Incremental change to one content block.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    CitationsDelta { citation: serde_json::Value },
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MessageDelta {
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
}

/// Usage reported by `message_delta`. Counts are cumulative.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaUsage {
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default)]
    pub input_tokens: Option<u32>,
}

// ── Payload shapes ─────────────────────────────────────────────────

#[derive(Deserialize)]
struct MessageStartPayload {
    #[serde(default)]
    message: MessageResponse,
}

#[derive(Deserialize)]
struct ContentBlockStartPayload {
    index: usize,
    content_block: ContentBlock,
}

#[derive(Deserialize)]
struct ContentBlockDeltaPayload {
    index: usize,
    delta: ContentDelta,
}

#[derive(Deserialize)]
struct IndexPayload {
    index: usize,
}

#[derive(Deserialize)]
struct MessageDeltaPayload {
    #[serde(default)]
    delta: MessageDelta,
    #[serde(default)]
    usage: DeltaUsage,
}

fn parse<T: DeserializeOwned>(event: &str, data: &str) -> std::result::Result<T, DecodeError> {
    serde_json::from_str(data).map_err(|source| DecodeError::Malformed {
        event: event.to_string(),
        source,
    })
}

/// Decode one framed record by its event type.
///
/// `ping`, an empty type, or an unknown type with an empty payload is a
/// keepalive. A `ping` payload, when present, must still be JSON. An `error` record becomes an [`Error::Api`] classified from its
/// `error.type`.
pub fn decode_record(event: &str, data: &str) -> Result<StreamEvent> {
    let decoded = match event {
        "ping" => {
            if !data.trim().is_empty() {
                parse::<serde_json::Value>(event, data)?;
            }
            StreamEvent::Ping
        }
        "message_start" => {
            let p: MessageStartPayload = parse(event, data)?;
            StreamEvent::MessageStart { message: p.message }
        }
        "content_block_start" => {
            let p: ContentBlockStartPayload = parse(event, data)?;
            StreamEvent::ContentBlockStart {
                index: p.index,
                content_block: p.content_block,
            }
        }
        "content_block_delta" => {
            let p: ContentBlockDeltaPayload = parse(event, data)?;
            StreamEvent::ContentBlockDelta {
                index: p.index,
                delta: p.delta,
            }
        }
        "content_block_stop" => {
            let p: IndexPayload = parse(event, data)?;
            StreamEvent::ContentBlockStop { index: p.index }
        }
        "message_delta" => {
            let p: MessageDeltaPayload = parse(event, data)?;
            StreamEvent::MessageDelta {
                delta: p.delta,
                usage: p.usage,
            }
        }
        "message_stop" => {
            parse::<serde_json::Value>(event, data)?;
            StreamEvent::MessageStop
        }
        "error" => {
            let body: ErrorBody = parse(event, data)?;
            return Err(ApiError {
                kind: ApiErrorKind::from_error_type(&body.error.error_type),
                status: 200,
                error_type: body.error.error_type,
                message: body.error.message,
                request: None,
            }
            .into());
        }
        "" => StreamEvent::Ping,
        _ if data.trim().is_empty() => StreamEvent::Ping,
        other => return Err(DecodeError::UnknownEvent(other.to_string()).into()),
    };
    Ok(decoded)
}

// ── Framing ────────────────────────────────────────────────────────

struct Record {
    event: String,
    data: String,
}

/// Accumulates field lines until a blank line closes the record.
#[derive(Default)]
struct RecordBuilder {
    event: Option<String>,
    data: Vec<String>,
}

impl RecordBuilder {
    fn push_line(&mut self, line: &str) -> Option<Record> {
        if line.is_empty() {
            return self.take();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // `id`, `retry` and unknown fields carry nothing we use.
            _ => {}
        }
        None
    }

    fn take(&mut self) -> Option<Record> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        Some(Record {
            event: self.event.take().unwrap_or_default(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

fn decode_line(raw: &[u8]) -> std::result::Result<&str, DecodeError> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    std::str::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8)
}

/// Checks the lifecycle ordering of decoded events.
///
/// Blocks start at contiguous indices from 0. Exactly one `message_delta`
/// follows the last closed block, and `message_stop` must follow it.
#[derive(Default)]
struct Sequencer {
    started: bool,
    delta_seen: bool,
    stopped: bool,
    next_index: usize,
    open: BTreeSet<usize>,
}

impl Sequencer {
    fn check(&mut self, event: &StreamEvent) -> std::result::Result<(), DecodeError> {
        let out_of_order = |msg: String| Err(DecodeError::OutOfOrder(msg));
        match event {
            StreamEvent::Ping => Ok(()),
            StreamEvent::MessageStart { .. } if self.started => {
                out_of_order("duplicate message_start".into())
            }
            StreamEvent::MessageStart { .. } => {
                self.started = true;
                Ok(())
            }
            other if !self.started => out_of_order(format!("{} before message_start", other.name())),
            StreamEvent::ContentBlockStart { .. }
            | StreamEvent::ContentBlockDelta { .. }
            | StreamEvent::ContentBlockStop { .. }
                if self.delta_seen =>
            {
                out_of_order(format!("{} after message_delta", event.name()))
            }
            StreamEvent::ContentBlockStart { index, .. } => {
                if *index != self.next_index {
                    return out_of_order(format!(
                        "content block {index} started, expected {}",
                        self.next_index
                    ));
                }
                self.next_index += 1;
                self.open.insert(*index);
                Ok(())
            }
            StreamEvent::ContentBlockDelta { index, .. } => {
                if self.open.contains(index) {
                    Ok(())
                } else {
                    out_of_order(format!("delta for content block {index} which is not open"))
                }
            }
            StreamEvent::ContentBlockStop { index } => {
                if self.open.remove(index) {
                    Ok(())
                } else {
                    out_of_order(format!("stop for content block {index} which is not open"))
                }
            }
            StreamEvent::MessageDelta { .. } => {
                if self.delta_seen {
                    out_of_order("duplicate message_delta".into())
                } else if let Some(index) = self.open.first() {
                    out_of_order(format!("message_delta while content block {index} is open"))
                } else {
                    self.delta_seen = true;
                    Ok(())
                }
            }
            StreamEvent::MessageStop => {
                if !self.delta_seen {
                    out_of_order("message_stop before message_delta".into())
                } else {
                    self.stopped = true;
                    Ok(())
                }
            }
        }
    }
}

// ── Decoder ────────────────────────────────────────────────────────

/// Incremental decoder over a byte stream.
///
/// Owns the body stream exclusively. Each call to
/// [`next_event`](Self::next_event) reads only as many chunks as it needs to
/// complete one record, racing every read against the cancellation token.
pub struct EventDecoder<S> {
    inner: S,
    cancel: CancellationToken,
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a newline.
    scanned: usize,
    record: RecordBuilder,
    sequencer: Sequencer,
    eof: bool,
    finished: bool,
    emitted: usize,
}

impl<S> EventDecoder<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    pub fn new(inner: S, cancel: CancellationToken) -> Self {
        Self {
            inner,
            cancel,
            buffer: Vec::new(),
            scanned: 0,
            record: RecordBuilder::default(),
            sequencer: Sequencer::default(),
            eof: false,
            finished: false,
            emitted: 0,
        }
    }

    /// `true` once `message_stop` was decoded or iteration failed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Read the next event. `Ok(None)` only after a clean `message_stop`.
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>> {
        if self.finished {
            return Ok(None);
        }
        let result = self.advance().await;
        if result.is_err() {
            self.finished = true;
        }
        result
    }

    async fn advance(&mut self) -> Result<Option<StreamEvent>> {
        loop {
            if let Some(record) = self.next_record()? {
                return self.emit(record).map(Some);
            }

            if self.eof {
                self.finished = true;
                if self.sequencer.stopped {
                    return Ok(None);
                }
                debug!("Stream ended after {} event(s) without message_stop", self.emitted);
                return Err(DecodeError::Incomplete.into());
            }

            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                chunk = self.inner.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => return Err(e),
                None => self.eof = true,
            }
        }
    }

    /// Pull complete lines out of the buffer until one closes a record. At
    /// end of stream a trailing unterminated line and record are flushed.
    fn next_record(&mut self) -> Result<Option<Record>> {
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            self.scanned = 0;
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = decode_line(&raw)?;
            if let Some(record) = self.record.push_line(line) {
                return Ok(Some(record));
            }
        }
        self.scanned = self.buffer.len();
        if self.eof {
            if !self.buffer.is_empty() {
                self.scanned = 0;
                let raw = std::mem::take(&mut self.buffer);
                let line = decode_line(&raw)?;
                if let Some(record) = self.record.push_line(line) {
                    return Ok(Some(record));
                }
            }
            return Ok(self.record.take());
        }
        Ok(None)
    }

    fn emit(&mut self, record: Record) -> Result<StreamEvent> {
        let event = decode_record(&record.event, &record.data)?;
        self.sequencer.check(&event)?;
        self.emitted += 1;
        trace!("Stream event #{}: {}", self.emitted, event.name());
        if matches!(event, StreamEvent::MessageStop) {
            self.finished = true;
            debug!("Stream completed with {} events", self.emitted);
        }
        Ok(event)
    }
}

impl<S> EventDecoder<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin + Send + 'static,
{
    /// Turn the decoder into a lazy stream. The first error is yielded once,
    /// then the stream ends; the body is dropped as soon as iteration stops.
    pub fn into_stream(self) -> EventStream {
        Box::pin(futures::stream::unfold(Some(self), |state| async move {
            let mut decoder = state?;
            match decoder.next_event().await {
                Ok(Some(event)) => {
                    let next = if decoder.is_finished() {
                        None
                    } else {
                        Some(decoder)
                    };
                    Some((Ok(event), next))
                }
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        }))
    }
}

/// Decode `bytes` into a lazy [`EventStream`].
pub fn decode<S>(bytes: S, cancel: CancellationToken) -> EventStream
where
    S: Stream<Item = Result<Bytes>> + Unpin + Send + 'static,
{
    EventDecoder::new(bytes, cancel).into_stream()
}

// ── Accumulation ───────────────────────────────────────────────────

/// Folds stream events back into the equivalent full [`MessageResponse`].
///
/// Text and thinking deltas are appended in place. Tool input arrives as
/// `input_json` fragments and is parsed when its block stops.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    message: MessageResponse,
    partial_json: BTreeMap<usize, String>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::MessageStart { message } => self.message = message.clone(),
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                let content = &mut self.message.content;
                if let Some(slot) = content.get_mut(*index) {
                    *slot = content_block.clone();
                } else if *index == content.len() {
                    content.push(content_block.clone());
                } else {
                    warn!(
                        "Skipping content block {index}: only {} block(s) started",
                        content.len()
                    );
                }
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                let Some(block) = self.message.content.get_mut(*index) else {
                    return;
                };
                match (block, delta) {
                    (ContentBlock::Text { text }, ContentDelta::TextDelta { text: more }) => {
                        text.push_str(more);
                    }
                    (ContentBlock::ToolUse { .. }, ContentDelta::InputJsonDelta { partial_json }) => {
                        self.partial_json
                            .entry(*index)
                            .or_default()
                            .push_str(partial_json);
                    }
                    (
                        ContentBlock::Thinking { thinking, .. },
                        ContentDelta::ThinkingDelta { thinking: more },
                    ) => thinking.push_str(more),
                    (
                        ContentBlock::Thinking { signature, .. },
                        ContentDelta::SignatureDelta { signature: more },
                    ) => signature.push_str(more),
                    _ => {}
                }
            }
            StreamEvent::ContentBlockStop { index } => {
                let Some(json) = self.partial_json.remove(index) else {
                    return;
                };
                if json.trim().is_empty() {
                    return;
                }
                if let Some(ContentBlock::ToolUse { input, name, .. }) =
                    self.message.content.get_mut(*index)
                {
                    match serde_json::from_str(&json) {
                        Ok(value) => *input = value,
                        Err(e) => warn!("Failed to parse input for tool `{name}`: {e}"),
                    }
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.message.stop_reason = delta.stop_reason;
                }
                if delta.stop_sequence.is_some() {
                    self.message.stop_sequence = delta.stop_sequence.clone();
                }
                self.message.usage.output_tokens = usage.output_tokens;
                if let Some(input) = usage.input_tokens {
                    self.message.usage.input_tokens = input;
                }
            }
            StreamEvent::MessageStop | StreamEvent::Ping => {}
        }
    }

    pub fn finish(self) -> MessageResponse {
        self.message
    }
}

/// Assemble the full message from a sequence of stream events.
pub fn collect_message(events: &[StreamEvent]) -> MessageResponse {
    let mut builder = MessageBuilder::new();
    for event in events {
        builder.apply(event);
    }
    builder.finish()
}

/// Assemble the concatenated text from a sequence of stream events.
pub fn collect_text(events: &[StreamEvent]) -> String {
    let mut text = String::new();
    for event in events {
        if let StreamEvent::ContentBlockDelta {
            delta: ContentDelta::TextDelta { text: delta },
            ..
        } = event
        {
            text.push_str(delta);
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::time::Duration;

    const MESSAGE_START: &str = "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"type\":\"message\",\"role\":\"assistant\",\"model\":\"claude-sonnet-4-5\",\"content\":[],\"stop_reason\":null,\"usage\":{\"input_tokens\":10,\"output_tokens\":1}}}\n\n";
    const BLOCK_START: &str = "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n";
    const BLOCK_DELTA: &str = "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n";
    const BLOCK_STOP: &str = "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n";
    const MESSAGE_DELTA: &str = "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\",\"stop_sequence\":null},\"usage\":{\"output_tokens\":5}}\n\n";
    const MESSAGE_STOP: &str = "event: message_stop\ndata: {}\n\n";

    fn full_stream() -> String {
        [
            MESSAGE_START,
            BLOCK_START,
            BLOCK_DELTA,
            BLOCK_STOP,
            MESSAGE_DELTA,
            MESSAGE_STOP,
        ]
        .concat()
    }

    fn chunks(parts: Vec<String>) -> impl Stream<Item = Result<Bytes>> + Unpin + Send + 'static {
        stream::iter(parts.into_iter().map(|p| Ok(Bytes::from(p))))
    }

    async fn drain(mut events: EventStream) -> (Vec<StreamEvent>, Option<Error>) {
        let mut out = Vec::new();
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => out.push(event),
                Err(e) => {
                    assert!(events.next().await.is_none(), "stream must end after an error");
                    return (out, Some(e));
                }
            }
        }
        (out, None)
    }

    fn names(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(StreamEvent::name).collect()
    }

    #[tokio::test]
    async fn decodes_canonical_sequence_in_order() {
        let events = decode(chunks(vec![full_stream()]), CancellationToken::new());
        let (events, err) = drain(events).await;
        assert!(err.is_none(), "unexpected error: {err:?}");
        assert_eq!(
            names(&events),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert!(matches!(
            &events[2],
            StreamEvent::ContentBlockDelta { index: 0, delta: ContentDelta::TextDelta { text } } if text == "hi"
        ));
    }

    #[tokio::test]
    async fn tolerates_arbitrary_chunking_and_crlf() {
        let body = full_stream().replace('\n', "\r\n");
        let parts: Vec<String> = body
            .as_bytes()
            .chunks(7)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect();
        let (events, err) = drain(decode(chunks(parts), CancellationToken::new())).await;
        assert!(err.is_none());
        assert_eq!(events.len(), 6);
        assert_eq!(events.last(), Some(&StreamEvent::MessageStop));
    }

    #[tokio::test]
    async fn multibyte_text_split_across_chunks() {
        let delta = "event: content_block_delta\ndata: {\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"héllo ✓\"}}\n\n";
        let body = [MESSAGE_START, BLOCK_START, delta, BLOCK_STOP, MESSAGE_DELTA, MESSAGE_STOP].concat();
        let bytes = body.into_bytes();
        let parts: Vec<Result<Bytes>> = bytes
            .chunks(3)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let (events, err) = drain(decode(stream::iter(parts), CancellationToken::new())).await;
        assert!(err.is_none(), "{err:?}");
        assert_eq!(collect_text(&events), "héllo ✓");
    }

    #[tokio::test]
    async fn truncated_stream_is_a_decode_failure() {
        let body = [MESSAGE_START, BLOCK_START].concat();
        let (events, err) = drain(decode(chunks(vec![body]), CancellationToken::new())).await;
        assert_eq!(names(&events), vec!["message_start", "content_block_start"]);
        assert!(matches!(err, Some(Error::Decode(DecodeError::Incomplete))), "{err:?}");
    }

    #[tokio::test]
    async fn empty_body_is_incomplete() {
        let (events, err) = drain(decode(chunks(vec![]), CancellationToken::new())).await;
        assert!(events.is_empty());
        assert!(matches!(err, Some(Error::Decode(DecodeError::Incomplete))));
    }

    #[tokio::test]
    async fn unknown_event_fails_after_prior_events() {
        let body = [
            MESSAGE_START,
            BLOCK_START,
            "event: mystery\ndata: {\"x\":1}\n\n",
            BLOCK_STOP,
        ]
        .concat();
        let (events, err) = drain(decode(chunks(vec![body]), CancellationToken::new())).await;
        assert_eq!(names(&events), vec!["message_start", "content_block_start"]);
        match err {
            Some(Error::Decode(DecodeError::UnknownEvent(name))) => assert_eq!(name, "mystery"),
            other => panic!("expected unknown event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn keepalives_and_comments_become_pings() {
        let body = [
            ": keepalive comment\n\n",
            "event: ping\ndata: {\"type\": \"ping\"}\n\n",
            MESSAGE_START,
            "event: future_thing\n\n",
            MESSAGE_DELTA,
            MESSAGE_STOP,
        ]
        .concat();
        let (events, err) = drain(decode(chunks(vec![body]), CancellationToken::new())).await;
        assert!(err.is_none(), "{err:?}");
        assert_eq!(
            names(&events),
            vec!["ping", "message_start", "ping", "message_delta", "message_stop"]
        );
    }

    #[tokio::test]
    async fn malformed_payload_is_a_decode_failure() {
        let body = [MESSAGE_START, "event: content_block_start\ndata: {\"index\": 0,\n\n"].concat();
        let (events, err) = drain(decode(chunks(vec![body]), CancellationToken::new())).await;
        assert_eq!(events.len(), 1);
        match err {
            Some(Error::Decode(DecodeError::Malformed { event, .. })) => {
                assert_eq!(event, "content_block_start")
            }
            other => panic!("expected malformed payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_event_surfaces_as_api_error() {
        let body = [
            MESSAGE_START,
            "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        ]
        .concat();
        let (events, err) = drain(decode(chunks(vec![body]), CancellationToken::new())).await;
        assert_eq!(events.len(), 1);
        let err = err.expect("error event must fail the stream");
        assert_eq!(err.api_kind(), Some(ApiErrorKind::Overloaded));
    }

    #[tokio::test]
    async fn delta_before_block_start_is_out_of_order() {
        let body = [MESSAGE_START, BLOCK_DELTA].concat();
        let (_, err) = drain(decode(chunks(vec![body]), CancellationToken::new())).await;
        assert!(matches!(err, Some(Error::Decode(DecodeError::OutOfOrder(_)))), "{err:?}");
    }

    fn assert_out_of_order(err: Option<Error>) {
        assert!(matches!(err, Some(Error::Decode(DecodeError::OutOfOrder(_)))), "{err:?}");
    }

    #[tokio::test]
    async fn stop_without_message_delta_is_out_of_order() {
        let body = [MESSAGE_START, BLOCK_START, BLOCK_DELTA, BLOCK_STOP, MESSAGE_STOP].concat();
        let (events, err) = drain(decode(chunks(vec![body]), CancellationToken::new())).await;
        assert_eq!(events.last().map(StreamEvent::name), Some("content_block_stop"));
        assert_out_of_order(err);
    }

    #[tokio::test]
    async fn stop_with_open_block_is_out_of_order() {
        let body = [MESSAGE_START, BLOCK_START, BLOCK_DELTA, MESSAGE_STOP].concat();
        let (_, err) = drain(decode(chunks(vec![body]), CancellationToken::new())).await;
        assert_out_of_order(err);

        let body = [MESSAGE_START, BLOCK_START, MESSAGE_DELTA, MESSAGE_STOP].concat();
        let (events, err) = drain(decode(chunks(vec![body]), CancellationToken::new())).await;
        assert_eq!(names(&events), vec!["message_start", "content_block_start"]);
        assert_out_of_order(err);
    }

    #[tokio::test]
    async fn duplicate_message_delta_is_out_of_order() {
        let body = [MESSAGE_START, MESSAGE_DELTA, MESSAGE_DELTA, MESSAGE_STOP].concat();
        let (events, err) = drain(decode(chunks(vec![body]), CancellationToken::new())).await;
        assert_eq!(names(&events), vec!["message_start", "message_delta"]);
        assert_out_of_order(err);
    }

    #[tokio::test]
    async fn content_after_message_delta_is_out_of_order() {
        let body = [MESSAGE_START, MESSAGE_DELTA, BLOCK_START, BLOCK_STOP, MESSAGE_STOP].concat();
        let (events, err) = drain(decode(chunks(vec![body]), CancellationToken::new())).await;
        assert_eq!(names(&events), vec!["message_start", "message_delta"]);
        assert_out_of_order(err);
    }

    #[tokio::test]
    async fn block_indices_must_be_contiguous() {
        let skipped = "event: content_block_start\ndata: {\"index\":2,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n";
        let body = [MESSAGE_START, skipped].concat();
        let (_, err) = drain(decode(chunks(vec![body]), CancellationToken::new())).await;
        assert_out_of_order(err);

        let body = [MESSAGE_START, BLOCK_START, BLOCK_STOP, BLOCK_START].concat();
        let (_, err) = drain(decode(chunks(vec![body]), CancellationToken::new())).await;
        assert_out_of_order(err);
    }

    #[tokio::test]
    async fn long_line_in_single_byte_chunks() {
        let text = "x".repeat(4096);
        let delta = format!(
            "event: content_block_delta\ndata: {{\"index\":0,\"delta\":{{\"type\":\"text_delta\",\"text\":\"{text}\"}}}}\n\n"
        );
        let body = [
            MESSAGE_START,
            BLOCK_START,
            delta.as_str(),
            BLOCK_STOP,
            MESSAGE_DELTA,
            MESSAGE_STOP,
        ]
        .concat();
        let parts: Vec<Result<Bytes>> = body
            .into_bytes()
            .chunks(1)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let (events, err) = drain(decode(stream::iter(parts), CancellationToken::new())).await;
        assert!(err.is_none(), "{err:?}");
        assert_eq!(collect_text(&events), text);
    }

    #[tokio::test]
    async fn content_before_message_start_is_out_of_order() {
        let (_, err) = drain(decode(chunks(vec![BLOCK_START.to_string()]), CancellationToken::new())).await;
        assert!(matches!(err, Some(Error::Decode(DecodeError::OutOfOrder(_)))));
    }

    #[tokio::test]
    async fn stops_reading_after_message_stop() {
        let body = [full_stream().as_str(), "event: mystery\ndata: {\"late\":true}\n\n"].concat();
        let (events, err) = drain(decode(chunks(vec![body]), CancellationToken::new())).await;
        assert!(err.is_none());
        assert_eq!(events.len(), 6);
    }

    #[tokio::test]
    async fn final_record_without_trailing_blank_line() {
        let body = full_stream();
        let body = body.trim_end().to_string();
        let (events, err) = drain(decode(chunks(vec![body]), CancellationToken::new())).await;
        assert!(err.is_none(), "{err:?}");
        assert_eq!(events.last(), Some(&StreamEvent::MessageStop));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_pending_read() {
        let cancel = CancellationToken::new();
        let head = stream::iter(vec![Ok(Bytes::from(MESSAGE_START))]);
        let body = head.chain(stream::pending());
        let mut events = decode(body, cancel.clone());

        assert!(matches!(
            events.next().await,
            Some(Ok(StreamEvent::MessageStart { .. }))
        ));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        assert!(matches!(events.next().await, Some(Err(Error::Cancelled))));
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn body_is_released_when_iteration_ends() {
        let (tx, rx) = futures::channel::mpsc::unbounded::<Result<Bytes>>();
        tx.unbounded_send(Ok(Bytes::from(full_stream()))).unwrap();
        let (events, err) = drain(decode(rx, CancellationToken::new())).await;
        assert!(err.is_none());
        assert_eq!(events.len(), 6);
        assert!(tx.is_closed(), "receiver should be dropped after message_stop");
    }

    #[tokio::test]
    async fn dropping_stream_early_releases_body() {
        let (tx, rx) = futures::channel::mpsc::unbounded::<Result<Bytes>>();
        tx.unbounded_send(Ok(Bytes::from(MESSAGE_START))).unwrap();
        let mut events = decode(rx, CancellationToken::new());
        assert!(events.next().await.is_some());
        drop(events);
        assert!(tx.is_closed());
    }

    #[test]
    fn decode_record_dispatches_on_event_type() {
        assert_eq!(decode_record("ping", "").unwrap(), StreamEvent::Ping);
        assert_eq!(decode_record("", "{}").unwrap(), StreamEvent::Ping);
        assert_eq!(decode_record("unheard_of", " ").unwrap(), StreamEvent::Ping);
        assert_eq!(decode_record("message_stop", "{}").unwrap(), StreamEvent::MessageStop);
        assert_eq!(
            decode_record("content_block_stop", r#"{"index":3}"#).unwrap(),
            StreamEvent::ContentBlockStop { index: 3 }
        );
        // The type is authoritative even when the payload says otherwise.
        assert_eq!(
            decode_record("content_block_stop", r#"{"type":"message_stop","index":1}"#).unwrap(),
            StreamEvent::ContentBlockStop { index: 1 }
        );
        assert!(matches!(
            decode_record("message_stop", ""),
            Err(Error::Decode(DecodeError::Malformed { .. }))
        ));
        assert!(matches!(
            decode_record("ping", "not json"),
            Err(Error::Decode(DecodeError::Malformed { .. }))
        ));
    }

    #[test]
    fn builder_skips_block_past_the_end() {
        let events = vec![
            decode_record(
                "content_block_start",
                r#"{"index":2,"content_block":{"type":"text","text":""}}"#,
            )
            .unwrap(),
            decode_record(
                "content_block_delta",
                r#"{"index":2,"delta":{"type":"text_delta","text":"lost"}}"#,
            )
            .unwrap(),
            decode_record(
                "content_block_start",
                r#"{"index":0,"content_block":{"type":"text","text":""}}"#,
            )
            .unwrap(),
            decode_record(
                "content_block_delta",
                r#"{"index":0,"delta":{"type":"text_delta","text":"kept"}}"#,
            )
            .unwrap(),
        ];
        let message = collect_message(&events);
        assert_eq!(message.content.len(), 1);
        assert_eq!(message.text(), "kept");
    }

    #[test]
    fn builder_reassembles_text_and_tool_use() {
        let events = vec![
            decode_record(
                "message_start",
                r#"{"message":{"id":"msg_2","role":"assistant","content":[],"usage":{"input_tokens":20,"output_tokens":1}}}"#,
            )
            .unwrap(),
            decode_record(
                "content_block_start",
                r#"{"index":0,"content_block":{"type":"text","text":""}}"#,
            )
            .unwrap(),
            decode_record(
                "content_block_delta",
                r#"{"index":0,"delta":{"type":"text_delta","text":"Let me "}}"#,
            )
            .unwrap(),
            decode_record(
                "content_block_delta",
                r#"{"index":0,"delta":{"type":"text_delta","text":"check."}}"#,
            )
            .unwrap(),
            decode_record("content_block_stop", r#"{"index":0}"#).unwrap(),
            decode_record(
                "content_block_start",
                r#"{"index":1,"content_block":{"type":"tool_use","id":"toolu_9","name":"weather","input":{}}}"#,
            )
            .unwrap(),
            decode_record(
                "content_block_delta",
                r#"{"index":1,"delta":{"type":"input_json_delta","partial_json":"{\"city\": "}}"#,
            )
            .unwrap(),
            decode_record(
                "content_block_delta",
                r#"{"index":1,"delta":{"type":"input_json_delta","partial_json":"\"Paris\"}"}}"#,
            )
            .unwrap(),
            decode_record("content_block_stop", r#"{"index":1}"#).unwrap(),
            decode_record(
                "message_delta",
                r#"{"delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":31}}"#,
            )
            .unwrap(),
            StreamEvent::MessageStop,
        ];

        let message = collect_message(&events);
        assert_eq!(message.id, "msg_2");
        assert_eq!(message.text(), "Let me check.");
        assert_eq!(message.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(message.usage.input_tokens, 20);
        assert_eq!(message.usage.output_tokens, 31);
        let uses = message.tool_uses();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].2, &serde_json::json!({"city": "Paris"}));
        assert_eq!(collect_text(&events), "Let me check.");
    }
}

//! Server-Sent Events decoding.
//!
//! This module provides [`SseDecoder`]: A stream adapter that parses the
//! `text/event-stream` framing from a byte stream and yields one value per
//! dispatched event.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use opmarshal_core::{RuleRegistry, SseMode, SsePlan};
use serde_json::{Map, Value};

use crate::ApiError;
use crate::cancel::CancelToken;

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Lifecycle of an [`SseDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// No line has been processed yet; a leading byte-order mark is stripped.
    AwaitingBom,
    Streaming,
    /// The byte stream ended and every event was delivered.
    Complete,
    /// A transport or decode error ended the stream.
    Failed,
    Cancelled,
}

impl DecoderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DecoderState::Complete | DecoderState::Failed | DecoderState::Cancelled
        )
    }
}

/// A dispatched event before mode-specific shaping.
#[derive(Debug)]
struct RawEvent {
    data: String,
    event: Option<String>,
    id: Option<String>,
    retry: Option<u64>,
}

/// Line parser and field accumulator.
#[derive(Debug, Default)]
struct SseState {
    buffer: Vec<u8>,
    started: bool,
    data: Vec<String>,
    event: Option<String>,
    retry: Option<u64>,
    last_event_id: Option<String>,
    reconnect: Option<u64>,
    ready: VecDeque<Result<RawEvent, ApiError>>,
}

impl SseState {
    /// Append a chunk and process every completed line.
    ///
    /// The buffer only ever holds a partial line, so only the new bytes are
    /// scanned for line terminators.
    fn feed(&mut self, chunk: &[u8]) {
        let scanned = self.buffer.len();
        self.buffer.extend_from_slice(chunk);
        let Some(last) = chunk.iter().rposition(|b| *b == b'\n') else {
            return;
        };
        let last = scanned + last;
        let tail = self.buffer.split_off(last + 1);
        let complete = std::mem::replace(&mut self.buffer, tail);
        for line in complete[..last].split(|b| *b == b'\n') {
            self.process_line(line);
        }
    }

    /// Flush the trailing partial line and dispatch what is left.
    fn finish(&mut self) {
        let rest = std::mem::take(&mut self.buffer);
        if !rest.is_empty() {
            self.process_line(&rest);
        }
        self.dispatch();
    }

    fn process_line(&mut self, line: &[u8]) {
        let mut line = line.strip_suffix(b"\r").unwrap_or(line);
        if !self.started {
            self.started = true;
            line = line.strip_prefix(BOM).unwrap_or(line);
        }
        let line = String::from_utf8_lossy(line);
        let line = line.as_ref();

        if line.is_empty() {
            self.dispatch();
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_owned()),
            "event" => self.event = Some(value.to_owned()),
            "id" if !value.contains('\0') => self.last_event_id = Some(value.to_owned()),
            "retry" if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
                if let Ok(millis) = value.parse::<u64>() {
                    self.retry = Some(millis);
                    self.reconnect = Some(millis);
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self) {
        let data = std::mem::take(&mut self.data);
        let event = self.event.take();
        let retry = self.retry.take();
        if data.is_empty() {
            #[cfg(feature = "tracing")]
            if let Some(name) = &event {
                tracing::debug!(event = %name, "discarding server-sent event without data");
            }
            return;
        }
        self.ready.push_back(Ok(RawEvent {
            data: data.join("\n"),
            event,
            id: self.last_event_id.clone(),
            retry,
        }));
    }

    fn has_pending(&self) -> bool {
        !self.ready.is_empty()
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.data.clear();
        self.event = None;
        self.retry = None;
        self.ready.clear();
    }
}

/// Stream adapter that decodes a `text/event-stream` body.
///
/// Wraps a byte stream and yields one value per dispatched event: the joined
/// `data` payload in [`SseMode::DataOnly`], or a
/// `{ data, event, id, retry? }` record in [`SseMode::FullEvent`]. The plan's
/// decode rule is applied to the data before it is emitted.
///
/// The [`CancelToken`] is checked on every poll. Once cancellation is
/// honored the byte stream is dropped, one [`ApiError::Cancelled`] is
/// yielded and the stream ends.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use futures::{StreamExt, stream};
/// use opmarshal_client::{CancelToken, SseDecoder};
/// use opmarshal_core::{RuleRegistry, SseMode, SsePlan};
///
/// futures::executor::block_on(async {
///     let body = stream::iter(vec![
///         Ok::<_, std::io::Error>(Bytes::from_static(b"data: hel")),
///         Ok(Bytes::from_static(b"lo\n\n")),
///     ]);
///     let mut events = SseDecoder::new(
///         body,
///         SsePlan::new(SseMode::DataOnly),
///         RuleRegistry::new(),
///         CancelToken::new(),
///     );
///     assert_eq!(events.next().await.unwrap().unwrap(), "hello");
///     assert!(events.next().await.is_none());
/// });
/// ```
pub struct SseDecoder<S> {
    /// The underlying byte stream; dropped once finished or cancelled.
    stream: Option<S>,
    parser: SseState,
    plan: SsePlan,
    registry: RuleRegistry,
    cancel: CancelToken,
    state: DecoderState,
}

impl<S> SseDecoder<S> {
    pub fn new(stream: S, plan: SsePlan, registry: RuleRegistry, cancel: CancelToken) -> Self {
        Self {
            stream: Some(stream),
            parser: SseState::default(),
            plan,
            registry,
            cancel,
            state: DecoderState::AwaitingBom,
        }
    }

    /// The last event id seen, for `Last-Event-ID` on reconnection.
    pub fn last_event_id(&self) -> Option<&str> {
        self.parser.last_event_id.as_deref()
    }

    /// The reconnection delay most recently requested by the server.
    pub fn retry(&self) -> Option<Duration> {
        self.parser.reconnect.map(Duration::from_millis)
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Check if the stream has finished.
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal() && !self.parser.has_pending()
    }

    fn should_cancel(&self) -> bool {
        if !self.cancel.is_cancelled() {
            return false;
        }
        match self.state {
            DecoderState::Cancelled | DecoderState::Failed => false,
            DecoderState::Complete => self.parser.has_pending(),
            DecoderState::AwaitingBom | DecoderState::Streaming => true,
        }
    }

    fn fail(&mut self) {
        self.state = DecoderState::Failed;
        self.stream = None;
        self.parser.clear();
    }

    fn shape(&self, event: RawEvent) -> Result<Value, ApiError> {
        let data = match self.plan.decode() {
            Some(rule) => self
                .registry
                .apply(rule, Value::String(event.data))
                .map_err(ApiError::from_decode_rule)?,
            None => Value::String(event.data),
        };
        Ok(match self.plan.mode() {
            SseMode::DataOnly => data,
            SseMode::FullEvent => {
                let mut record = Map::new();
                record.insert("data".into(), data);
                record.insert(
                    "event".into(),
                    Value::String(event.event.unwrap_or_else(|| "message".into())),
                );
                record.insert("id".into(), event.id.map_or(Value::Null, Value::String));
                if let Some(retry) = event.retry {
                    record.insert("retry".into(), Value::from(retry));
                }
                Value::Object(record)
            }
        })
    }
}

impl<S, E> Stream for SseDecoder<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = Result<Value, ApiError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.should_cancel() {
                #[cfg(feature = "tracing")]
                tracing::debug!("event stream cancelled");
                this.stream = None;
                this.parser.clear();
                this.state = DecoderState::Cancelled;
                return Poll::Ready(Some(Err(ApiError::Cancelled)));
            }

            // Deliver events already dispatched by the parser
            if let Some(next) = this.parser.ready.pop_front() {
                let shaped = next.and_then(|event| this.shape(event));
                if shaped.is_err() {
                    this.fail();
                }
                return Poll::Ready(Some(shaped));
            }

            if this.state.is_terminal() {
                return Poll::Ready(None);
            }

            this.cancel.register(cx.waker());
            if this.cancel.is_cancelled() {
                continue;
            }

            let Some(stream) = this.stream.as_mut() else {
                this.state = DecoderState::Complete;
                return Poll::Ready(None);
            };
            match Pin::new(stream).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.parser.feed(&chunk);
                    if this.state == DecoderState::AwaitingBom && this.parser.started {
                        this.state = DecoderState::Streaming;
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.fail();
                    return Poll::Ready(Some(Err(ApiError::transport(e))));
                }
                Poll::Ready(None) => {
                    this.stream = None;
                    this.parser.finish();
                    this.state = DecoderState::Complete;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S> std::fmt::Debug for SseDecoder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseDecoder")
            .field("state", &self.state)
            .field("mode", &self.plan.mode())
            .field("last_event_id", &self.parser.last_event_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use futures::stream;
    use opmarshal_core::{EncodingRule, ErrorKind};
    use serde_json::json;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin + use<> {
        stream::iter(
            parts
                .iter()
                .map(|part| Ok(Bytes::from_static(*part)))
                .collect::<Vec<_>>(),
        )
    }

    fn decoder<S>(stream: S, mode: SseMode) -> SseDecoder<S> {
        SseDecoder::new(stream, SsePlan::new(mode), RuleRegistry::new(), CancelToken::new())
    }

    async fn collect<S>(decoder: SseDecoder<S>) -> Vec<Result<Value, ApiError>>
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Unpin,
    {
        decoder.collect().await
    }

    fn values(results: Vec<Result<Value, ApiError>>) -> Vec<Value> {
        results.into_iter().map(|r| r.unwrap()).collect()
    }

    #[tokio::test]
    async fn test_event_split_across_chunks() {
        let events = decoder(chunks(&[b"data: hel", b"lo\n\n"]), SseMode::DataOnly);
        assert_eq!(values(collect(events).await), vec![json!("hello")]);

        for split in 1..14 {
            let raw: &'static [u8] = b"data: hello\n\n";
            let (a, b) = raw.split_at(split);
            let events = decoder(chunks(&[a, b]), SseMode::DataOnly);
            assert_eq!(values(collect(events).await), vec![json!("hello")], "split at {split}");
        }
    }

    #[tokio::test]
    async fn test_comments_and_multiline_data() {
        let events = decoder(
            chunks(&[b": keep-alive\n", b"data: first\ndata: second\n\n", b":\n\n"]),
            SseMode::DataOnly,
        );
        assert_eq!(values(collect(events).await), vec![json!("first\nsecond")]);
    }

    #[tokio::test]
    async fn test_full_event_records() {
        let events = decoder(
            chunks(&[b"event: update\nid: 7\nretry: 1500\ndata: {\"x\":1}\n\ndata:plain\n\n"]),
            SseMode::FullEvent,
        );
        assert_eq!(
            values(collect(events).await),
            vec![
                json!({"data": "{\"x\":1}", "event": "update", "id": "7", "retry": 1500}),
                json!({"data": "plain", "event": "message", "id": "7"}),
            ]
        );
    }

    #[tokio::test]
    async fn test_full_event_without_id() {
        let events = decoder(chunks(&[b"data: x\n\n"]), SseMode::FullEvent);
        assert_eq!(
            values(collect(events).await),
            vec![json!({"data": "x", "event": "message", "id": null})]
        );
    }

    #[tokio::test]
    async fn test_id_with_nul_is_ignored() {
        let mut events = decoder(
            chunks(&[b"id: 1\ndata: a\n\nid: b\x00d\ndata: b\n\n"]),
            SseMode::FullEvent,
        );
        let first = events.next().await.unwrap().unwrap();
        let second = events.next().await.unwrap().unwrap();
        assert_eq!(first["id"], "1");
        assert_eq!(second["id"], "1");
        assert!(events.next().await.is_none());
        assert_eq!(events.last_event_id(), Some("1"));
    }

    #[tokio::test]
    async fn test_bom_and_crlf() {
        let mut events = decoder(
            chunks(&[b"\xEF\xBB\xBFdata: a\r\n\r\n", b"data: b\r\n\r\n"]),
            SseMode::DataOnly,
        );
        assert_eq!(events.state(), DecoderState::AwaitingBom);
        assert_eq!(events.next().await.unwrap().unwrap(), json!("a"));
        assert_eq!(events.state(), DecoderState::Streaming);
        assert_eq!(events.next().await.unwrap().unwrap(), json!("b"));
        assert!(events.next().await.is_none());
        assert_eq!(events.state(), DecoderState::Complete);
    }

    #[tokio::test]
    async fn test_retry_requires_digits() {
        let mut events = decoder(
            chunks(&[b"retry: 3000\nretry: soon\nretry: +5\ndata: x\n\n"]),
            SseMode::DataOnly,
        );
        assert_eq!(events.next().await.unwrap().unwrap(), json!("x"));
        assert_eq!(events.retry(), Some(Duration::from_millis(3000)));
    }

    #[tokio::test]
    async fn test_field_without_colon_and_unknown_fields() {
        let events = decoder(chunks(&[b"data\nfoo: bar\ndata:x\n\n"]), SseMode::DataOnly);
        assert_eq!(values(collect(events).await), vec![json!("\nx")]);
    }

    #[tokio::test]
    async fn test_event_without_data_is_discarded() {
        let events = decoder(chunks(&[b"event: ping\n\ndata: x\n\n"]), SseMode::DataOnly);
        assert_eq!(values(collect(events).await), vec![json!("x")]);
    }

    #[tokio::test]
    async fn test_stream_end_flushes_partial_line() {
        let events = decoder(chunks(&[b"data: a\n\ndata: tail"]), SseMode::DataOnly);
        assert_eq!(values(collect(events).await), vec![json!("a"), json!("tail")]);
    }

    #[tokio::test]
    async fn test_decode_rule_applied_to_data() {
        let plan = SsePlan::new(SseMode::DataOnly).with_decode(EncodingRule::ParseJson);
        let events = SseDecoder::new(
            chunks(&[b"data: {\"n\":1}\n\n", b"data: {\"n\":2}\n\n"]),
            plan,
            RuleRegistry::new(),
            CancelToken::new(),
        );
        assert_eq!(values(collect(events).await), vec![json!({"n": 1}), json!({"n": 2})]);
    }

    #[tokio::test]
    async fn test_decode_failure_ends_stream() {
        let plan = SsePlan::new(SseMode::DataOnly).with_decode(EncodingRule::ParseJson);
        let mut events = SseDecoder::new(
            chunks(&[b"data: 1\n\ndata: {\n\ndata: 3\n\n"]),
            plan,
            RuleRegistry::new(),
            CancelToken::new(),
        );
        assert_eq!(events.next().await.unwrap().unwrap(), json!(1));
        let err = events.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert!(events.next().await.is_none());
        assert_eq!(events.state(), DecoderState::Failed);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let results = collect(decoder(
            chunks(&[b"data: a\xFFb\n\nid: \xC3\n", b"data: ok\n\n"]),
            SseMode::DataOnly,
        ))
        .await;
        assert_eq!(values(results), vec![json!("a\u{FFFD}b"), json!("ok")]);

        let mut events = decoder(chunks(&[b"id: \xC3\ndata: x\n\n"]), SseMode::DataOnly);
        assert_eq!(events.next().await.unwrap().unwrap(), json!("x"));
        assert_eq!(events.last_event_id(), Some("\u{FFFD}"));
    }

    #[tokio::test]
    async fn test_long_line_across_tiny_chunks() {
        let mut body = vec![b"data: ".to_vec()];
        body.extend(std::iter::repeat_n(b"x".to_vec(), 4096));
        body.push(b"\n".to_vec());
        body.push(b"\n".to_vec());
        let body = stream::iter(body.into_iter().map(|part| Ok::<_, std::io::Error>(Bytes::from(part))).collect::<Vec<_>>());

        let results = collect(decoder(body, SseMode::DataOnly)).await;
        assert_eq!(values(results), vec![json!("x".repeat(4096))]);
    }

    #[tokio::test]
    async fn test_transport_error_discards_partial_event() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"data: a\n\ndata: partial\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(b"\n")),
        ]);
        let mut events = decoder(body, SseMode::DataOnly);
        assert_eq!(events.next().await.unwrap().unwrap(), json!("a"));
        let err = events.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert!(events.next().await.is_none());
        assert_eq!(events.state(), DecoderState::Failed);
    }

    #[tokio::test]
    async fn test_cancel_suppresses_dispatched_events() {
        let token = CancelToken::new();
        let mut events = SseDecoder::new(
            chunks(&[b"data: a\n\ndata: b\n\n", b"data: c\n\n"]),
            SsePlan::default(),
            RuleRegistry::new(),
            token.clone(),
        );
        assert_eq!(events.next().await.unwrap().unwrap(), json!("a"));
        token.cancel();
        let err = events.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(events.next().await.is_none());
        assert_eq!(events.state(), DecoderState::Cancelled);
        assert!(events.is_finished());
    }

    #[tokio::test]
    async fn test_cancel_wakes_pending_read() {
        let token = CancelToken::new();
        let body = chunks(&[b"data: a\n\n"]).chain(stream::pending());
        let mut events = SseDecoder::new(body, SsePlan::default(), RuleRegistry::new(), token.clone());
        assert_eq!(events.next().await.unwrap().unwrap(), json!("a"));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let err = events.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(events.next().await.is_none());
    }
}

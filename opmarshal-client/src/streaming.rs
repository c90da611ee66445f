//! Streaming response wrapper for event-stream operations.
//!
//! This module provides [`Streaming`], a wrapper around a decoded event
//! stream that exposes reconnection state and cancellation.
//!
//! # Cancellation
//!
//! Dropping a [`Streaming`] drops the underlying byte stream, which aborts
//! the transport read. To stop a stream that is polled from another task,
//! cancel its [`CancelToken`](crate::CancelToken); the consumer is woken,
//! the byte stream is dropped and no further events are delivered.
//!
//! There are no timeouts here. Wrap reads in `tokio::time::timeout` (or any
//! runtime's equivalent) and cancel when it elapses.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;

use crate::ApiError;
use crate::response::{DecoderState, SseDecoder};

/// Wrapper for streaming response values.
///
/// # Example
///
/// ```ignore
/// let mut events = marshaller.consume_stream(&plan, response, CancelToken::new()).await?;
///
/// while let Some(result) = events.next().await {
///     match result {
///         Ok(event) => println!("Got event: {event}"),
///         Err(e) => eprintln!("Error: {e}"),
///     }
/// }
///
/// // Resume later from where the server left off
/// if let Some(id) = events.last_event_id() {
///     println!("Last-Event-ID: {id}");
/// }
/// ```
pub struct Streaming<S> {
    inner: S,
}

impl<S> Streaming<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consume the wrapper and return the inner stream.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S> Streaming<SseDecoder<S>> {
    /// The last event id seen, for `Last-Event-ID` on reconnection.
    pub fn last_event_id(&self) -> Option<&str> {
        self.inner.last_event_id()
    }

    /// The reconnection delay most recently requested by the server.
    pub fn retry(&self) -> Option<Duration> {
        self.inner.retry()
    }

    pub fn state(&self) -> DecoderState {
        self.inner.state()
    }

    /// Request cancellation; the next poll ends the stream.
    pub fn cancel(&self) {
        self.inner.cancel_token().cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl<S, T> Streaming<S>
where
    S: Stream<Item = Result<T, ApiError>> + Unpin,
{
    /// Drain all remaining values from the stream.
    ///
    /// Returns the number of values that were drained (not including errors).
    pub async fn drain(&mut self) -> usize {
        use futures::StreamExt;
        let mut count = 0;
        while let Some(result) = self.inner.next().await {
            if result.is_ok() {
                count += 1;
            }
        }
        count
    }
}

impl<S, T> Stream for Streaming<S>
where
    S: Stream<Item = Result<T, ApiError>> + Unpin,
{
    type Item = Result<T, ApiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<S> std::fmt::Debug for Streaming<S>
where
    S: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Streaming").field("inner", &self.inner).finish()
    }
}

//! Parser for streamed openai-compatible chat completions.
//!
//! Text deltas are forwarded as they arrive. Tool call fragments are accumulated per
//! index and the complete assistant message is emitted once the stream ends.
use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;
use std::task::{Context, Poll};

use anyhow::{anyhow, Result};
use bytes::Bytes;
use eventsource_stream::{EventStream, Eventsource};
use futures::Stream;
use serde_json::Value;

use super::base::{StreamEvent, Usage};
use super::utils::{openai_error, parse_usage, tool_request_from_parts};
use crate::models::message::Message;

/// Appends a blank line when the body ends, so a final event without its
/// terminator is still dispatched.
struct SseTerminatedStream<S> {
    inner: S,
    emitted_terminator: bool,
}

impl<S> SseTerminatedStream<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            emitted_terminator: false,
        }
    }
}

impl<S, E> Stream for SseTerminatedStream<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
{
    type Item = std::result::Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.emitted_terminator {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(None) => {
                self.emitted_terminator = true;
                Poll::Ready(Some(Ok(Bytes::from_static(b"\n\n"))))
            }
            other => other,
        }
    }
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

pub struct ChatCompletionsSseParser<S> {
    inner: EventStream<SseTerminatedStream<S>>,
    pending: VecDeque<Result<StreamEvent>>,
    text: String,
    tool_calls: BTreeMap<u64, PartialToolCall>,
    usage: Option<Usage>,
    finished: bool,
}

impl<S, E> ChatCompletionsSseParser<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            inner: SseTerminatedStream::new(stream).eventsource(),
            pending: VecDeque::new(),
            text: String::new(),
            tool_calls: BTreeMap::new(),
            usage: None,
            finished: false,
        }
    }
}

impl<S> ChatCompletionsSseParser<S> {
    fn handle_event_data(&mut self, data: &str) -> Result<()> {
        let trimmed = data.trim();
        if trimmed.is_empty() || trimmed == "[DONE]" {
            return Ok(());
        }

        let chunk: Value = serde_json::from_str(trimmed)
            .map_err(|e| anyhow!("Failed to parse SSE JSON: {}", e))?;

        if let Some(error) = chunk.get("error") {
            return Err(openai_error(error));
        }

        // Usage may come on its own in a final chunk without choices
        if let Some(usage) = chunk.get("usage").filter(|usage| !usage.is_null()) {
            self.usage = Some(parse_usage(usage));
        }

        let delta = chunk
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("delta"));

        if let Some(delta) = delta {
            self.process_delta(delta);
        }

        Ok(())
    }

    fn process_delta(&mut self, delta: &Value) {
        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                self.text.push_str(text);
                self.pending
                    .push_back(Ok(StreamEvent::TextDelta(text.to_string())));
            }
        }

        let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) else {
            return;
        };

        // Some compatible endpoints omit the index when each chunk carries whole calls
        let base = self.tool_calls.len();
        for (position, tool_call) in tool_calls.iter().enumerate() {
            let index = tool_call
                .get("index")
                .and_then(Value::as_u64)
                .unwrap_or((base + position) as u64);
            let entry = self.tool_calls.entry(index).or_default();

            if let Some(id) = tool_call.get("id").and_then(Value::as_str) {
                if !id.is_empty() {
                    entry.id = id.to_string();
                }
            }

            let function = tool_call.get("function").unwrap_or(&Value::Null);
            if let Some(name) = function.get("name").and_then(Value::as_str) {
                entry.name.push_str(name);
            }
            if let Some(arguments) = function.get("arguments").and_then(Value::as_str) {
                entry.arguments.push_str(arguments);
            }
        }
    }

    fn complete(&mut self) {
        self.finished = true;

        let mut message = Message::assistant();
        if !self.text.is_empty() {
            message = message.with_text(std::mem::take(&mut self.text));
        }
        for (index, call) in std::mem::take(&mut self.tool_calls) {
            let id = if call.id.is_empty() {
                format!("toolcall-{}", index)
            } else {
                call.id
            };
            message = message.with_content(tool_request_from_parts(&id, &call.name, &call.arguments));
        }

        let usage = self.usage.take().unwrap_or_default();
        self.pending
            .push_back(Ok(StreamEvent::Completed { message, usage }));
    }
}

impl<S, E> Stream for ChatCompletionsSseParser<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = Result<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Poll::Ready(Some(event));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if let Err(err) = self.handle_event_data(&event.data) {
                        // An error ends the stream, nothing is completed after it
                        self.finished = true;
                        self.pending.clear();
                        return Poll::Ready(Some(Err(err)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(anyhow!("SSE stream error: {}", e))));
                }
                Poll::Ready(None) => self.complete(),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

//! Conversion of the user/model SSE stream into forward-protocol events.
//!
//! `StreamTranslator` is a synchronous state machine over raw bytes: it only
//! decodes complete lines, so a record or a multi-byte character split across
//! transport reads is never emitted in pieces. `convert_stream` drives it from
//! a producer task through a bounded channel, which makes the output
//! pull-driven.

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::hardening::strip_namespace;
use crate::GeminiPart;

pub const STREAM_END_SENTINEL: &str = "[DONE]";
pub const DEFAULT_STREAM_QUEUE_CAPACITY: usize = 1;
/// Longest record accepted before a line break arrives.
pub const MAX_STREAM_RECORD_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
/// Events of the forward protocol's streamed response.
pub enum StreamEvent {
    ContentBlockDelta {
        index: usize,
        delta: StreamDelta,
    },
    MessageStop {
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
    Error {
        error: StreamErrorBody,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamDelta {
    TextDelta {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::ContentBlockDelta {
            index: 0,
            delta: StreamDelta::TextDelta { text: text.into() },
        }
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            error: StreamErrorBody {
                kind: kind.into(),
                message: message.into(),
            },
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::ContentBlockDelta { .. } => "content_block_delta",
            Self::MessageStop { .. } => "message_stop",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::ContentBlockDelta { .. })
    }

    /// Renders the event as one `event:`/`data:` frame.
    pub fn to_sse_frame(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","error":{"type":"serialization_error","message":"failed to encode stream event"}}"#
                .to_string()
        });
        format!("event: {}\ndata: {data}\n\n", self.event_name())
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    candidates: Option<Vec<StreamCandidate>>,
}

#[derive(Debug, Deserialize)]
struct StreamCandidate {
    content: Option<StreamCandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamCandidateContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug)]
/// Incremental byte-level translator for one response stream.
pub struct StreamTranslator {
    buffer: Vec<u8>,
    scanned: usize,
    max_record_bytes: usize,
    finished: bool,
    finish_reason: Option<String>,
    tool_calls: usize,
    tool_namespace: Option<String>,
}

impl Default for StreamTranslator {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_record_bytes: MAX_STREAM_RECORD_BYTES,
            finished: false,
            finish_reason: None,
            tool_calls: 0,
            tool_namespace: None,
        }
    }
}

impl StreamTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_record_bytes(mut self, max_record_bytes: usize) -> Self {
        self.max_record_bytes = max_record_bytes.max(1);
        self
    }

    /// Strips `namespace` from function-call names before emitting them.
    pub fn with_tool_namespace(namespace: impl Into<String>) -> Self {
        Self {
            tool_namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feeds one transport chunk and returns the events completed by it.
    ///
    /// Input after the terminal event is ignored.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.buffer.extend_from_slice(chunk);

        // Bytes before `scanned` are already known to hold no line break.
        while let Some(offset) = self.buffer[self.scanned..]
            .iter()
            .position(|byte| *byte == b'\n')
        {
            let line = self
                .buffer
                .drain(..=self.scanned + offset)
                .collect::<Vec<_>>();
            self.scanned = 0;
            self.process_line(&line, &mut events);
            if self.finished {
                self.buffer.clear();
                return events;
            }
        }
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_record_bytes {
            self.buffer.clear();
            self.scanned = 0;
            let message = format!(
                "stream record exceeds {} bytes without a line break",
                self.max_record_bytes
            );
            self.terminate(
                StreamEvent::error("invalid_stream_record", message),
                &mut events,
            );
        }
        events
    }

    /// Signals end of input and returns the remaining events, always ending
    /// with exactly one terminal event unless one was already emitted.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.scanned = 0;
            self.process_line(&line, &mut events);
        }
        if !self.finished {
            let terminal = match self.finish_reason.clone() {
                Some(reason) => StreamEvent::MessageStop {
                    stop_reason: Some(reason),
                },
                None => StreamEvent::error(
                    "incomplete_stream",
                    "stream ended before the end-of-stream marker",
                ),
            };
            self.terminate(terminal, &mut events);
        }
        events
    }

    /// Terminates the stream because the transport failed.
    pub fn fail(&mut self, message: impl Into<String>) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;
        self.buffer.clear();
        self.scanned = 0;
        Some(StreamEvent::error("transport_error", message))
    }

    fn terminate(&mut self, event: StreamEvent, events: &mut Vec<StreamEvent>) {
        self.finished = true;
        events.push(event);
    }

    fn process_line(&mut self, raw: &[u8], events: &mut Vec<StreamEvent>) {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(error) => {
                self.terminate(
                    StreamEvent::error(
                        "invalid_stream_record",
                        format!("stream record is not valid UTF-8: {error}"),
                    ),
                    events,
                );
                return;
            }
        };
        if line.is_empty()
            || line.starts_with(':')
            || line.starts_with("event:")
            || line.starts_with("id:")
            || line.starts_with("retry:")
        {
            return;
        }

        let payload = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
        if payload.is_empty() {
            return;
        }
        if payload == STREAM_END_SENTINEL {
            let stop_reason = self.finish_reason.clone();
            self.terminate(StreamEvent::MessageStop { stop_reason }, events);
            return;
        }

        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(error) => {
                self.terminate(
                    StreamEvent::error(
                        "invalid_stream_record",
                        format!("failed to parse stream record: {error}"),
                    ),
                    events,
                );
                return;
            }
        };

        if let Some(error) = value.get("error") {
            let kind = error
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("api_error")
                .to_string();
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            self.terminate(StreamEvent::error(kind, message), events);
            return;
        }

        let chunk: StreamChunk = match serde_json::from_value(value) {
            Ok(chunk) => chunk,
            Err(error) => {
                self.terminate(
                    StreamEvent::error(
                        "invalid_stream_record",
                        format!("stream record has an unexpected shape: {error}"),
                    ),
                    events,
                );
                return;
            }
        };
        self.apply_chunk(chunk, events);
    }

    fn apply_chunk(&mut self, chunk: StreamChunk, events: &mut Vec<StreamEvent>) {
        let Some(candidate) = chunk
            .candidates
            .and_then(|candidates| candidates.into_iter().next())
        else {
            return;
        };
        if let Some(reason) = candidate.finish_reason {
            self.finish_reason = Some(reason);
        }
        let parts = candidate
            .content
            .and_then(|content| content.parts)
            .unwrap_or_default();

        let mut text = String::new();
        let mut calls = Vec::new();
        for part in parts {
            if part.thought.unwrap_or(false) {
                continue;
            }
            if let Some(fragment) = part.text {
                text.push_str(&fragment);
            }
            if let Some(call) = part.function_call {
                calls.push(call);
            }
        }

        if !text.is_empty() {
            events.push(StreamEvent::text(text));
        }
        for call in calls {
            self.tool_calls += 1;
            let name = match self.tool_namespace.as_deref() {
                Some(namespace) => strip_namespace(&call.name, namespace).to_string(),
                None => call.name,
            };
            events.push(StreamEvent::ContentBlockDelta {
                index: self.tool_calls,
                delta: StreamDelta::ToolUse {
                    id: call
                        .id
                        .unwrap_or_else(|| format!("gemini_stream_call_{}", self.tool_calls)),
                    name,
                    input: call.args,
                },
            });
        }
    }
}

/// Converts a byte stream into a pull-driven stream of forward events.
///
/// A producer task reads `source` and sends through a channel of `capacity`
/// slots, so it stalls until the consumer accepts each event. Dropping the
/// returned stream stops the producer and drops `source`. Must be called
/// inside a tokio runtime.
pub fn convert_stream<S, B, E>(
    source: S,
    translator: StreamTranslator,
    capacity: usize,
) -> ReceiverStream<StreamEvent>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(pump_stream(source, translator, tx));
    ReceiverStream::new(rx)
}

async fn pump_stream<S, B, E>(
    source: S,
    mut translator: StreamTranslator,
    tx: mpsc::Sender<StreamEvent>,
) where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let mut source = Box::pin(source);
    loop {
        let next = tokio::select! {
            item = source.next() => item,
            _ = tx.closed() => {
                tracing::debug!("stream consumer dropped; releasing transport");
                return;
            }
        };

        let events = match next {
            Some(Ok(chunk)) => translator.push(chunk.as_ref()),
            Some(Err(error)) => translator
                .fail(format!("stream transport failed: {error}"))
                .into_iter()
                .collect(),
            None => translator.finish(),
        };
        for event in events {
            if tx.send(event).await.is_err() {
                tracing::debug!("stream consumer dropped; releasing transport");
                return;
            }
        }
        if translator.is_finished() {
            return;
        }
    }
}

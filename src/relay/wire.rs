//! Wire Events
//!
//! Push events as seen by a remote client, their server-sent-events framing,
//! and the client-side decoder that reassembles them from arbitrary reads.

use crate::domain::command::ExecutionEvent;
use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Payload of the `done` event
pub const DONE_PAYLOAD: &str = "completed";

/// Event discriminant on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireEventKind {
    Stdout,
    Stderr,
    Done,
    Error,
}

/// One pushed event: `{"type": "...", "payload": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub kind: WireEventKind,
    pub payload: String,
}

impl WireEvent {
    pub fn new(kind: WireEventKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn done() -> Self {
        Self::new(WireEventKind::Done, DONE_PAYLOAD)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(WireEventKind::Error, message)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, WireEventKind::Done | WireEventKind::Error)
    }

    /// Server-sent-events frame: `data: <json>\n\n`
    pub fn to_sse_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

/// Incremental UTF-8 decoding that holds back an incomplete trailing
/// sequence until the next chunk arrives.
#[derive(Debug, Default)]
pub(crate) struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub(crate) fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        // Invalid sequences are released for lossy decoding; only an
        // incomplete sequence at the very end is held back.
        let mut complete = 0;
        loop {
            match std::str::from_utf8(&self.pending[complete..]) {
                Ok(_) => {
                    complete = self.pending.len();
                    break;
                }
                Err(e) => match e.error_len() {
                    Some(invalid) => complete += e.valid_up_to() + invalid,
                    None => {
                        complete += e.valid_up_to();
                        break;
                    }
                },
            }
        }

        let rest = self.pending.split_off(complete);
        let head = std::mem::replace(&mut self.pending, rest);
        String::from_utf8_lossy(&head).into_owned()
    }

    /// Whatever is still held back, decoded lossily
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}

/// Maps execution events to wire events, one per execution event.
///
/// A multi-byte character split across chunks of one stream is emitted
/// whole with the later chunk. Bytes still held back when the terminal
/// event arrives are flushed as one extra data event just before it.
#[derive(Debug, Default)]
pub struct WireTranslator {
    stdout: Utf8Carry,
    stderr: Utf8Carry,
}

impl WireTranslator {
    pub fn translate(&mut self, event: ExecutionEvent) -> Vec<WireEvent> {
        match event {
            ExecutionEvent::StdoutChunk(data) => {
                vec![WireEvent::new(WireEventKind::Stdout, self.stdout.decode(&data))]
            }
            ExecutionEvent::StderrChunk(data) => {
                vec![WireEvent::new(WireEventKind::Stderr, self.stderr.decode(&data))]
            }
            ExecutionEvent::Completed => self.terminate(WireEvent::done()),
            ExecutionEvent::Failed { reason } => {
                self.terminate(WireEvent::error(reason.to_string()))
            }
        }
    }

    fn terminate(&mut self, terminal: WireEvent) -> Vec<WireEvent> {
        let mut events = Vec::with_capacity(1);
        if let Some(rest) = self.stdout.finish() {
            events.push(WireEvent::new(WireEventKind::Stdout, rest));
        }
        if let Some(rest) = self.stderr.finish() {
            events.push(WireEvent::new(WireEventKind::Stderr, rest));
        }
        events.push(terminal);
        events
    }
}

/// Client-side SSE frame decoder.
///
/// Accepts reads split anywhere, including inside a frame, a line, or a
/// multi-byte character.
#[derive(Debug, Default)]
pub struct SseDecoder {
    text: Utf8Carry,
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every event completed by them
    pub fn feed(&mut self, chunk: &[u8]) -> RelayResult<Vec<WireEvent>> {
        let text = self.text.decode(chunk);
        self.buffer.extend(text.chars().filter(|c| *c != '\r'));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let frame: String = self.buffer.drain(..end + 2).collect();
            if let Some(event) = decode_frame(&frame)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// True when no partial frame is buffered
    pub fn is_idle(&self) -> bool {
        self.buffer.trim().is_empty() && self.text.pending.is_empty()
    }
}

fn decode_frame(frame: &str) -> RelayResult<Option<WireEvent>> {
    let data: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    if data.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&data.join("\n"))?))
}

/// Client-side consumer enforcing the terminal-event contract
#[derive(Debug, Default)]
pub struct StreamConsumer {
    decoder: SseDecoder,
    terminal: Option<WireEvent>,
}

impl StreamConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from the transport
    pub fn feed(&mut self, chunk: &[u8]) -> RelayResult<Vec<WireEvent>> {
        let events = self.decoder.feed(chunk)?;
        for event in &events {
            if self.terminal.is_some() {
                return Err(RelayError::violation("event received after the terminal event"));
            }
            if event.is_terminal() {
                self.terminal = Some(event.clone());
            }
        }
        Ok(events)
    }

    /// The transport closed; the terminal event must have been seen
    pub fn finish(self) -> RelayResult<WireEvent> {
        match self.terminal {
            Some(terminal) => Ok(terminal),
            None if !self.decoder.is_idle() => Err(RelayError::violation(
                "stream closed in the middle of an event",
            )),
            None => Err(RelayError::violation("stream closed without a terminal event")),
        }
    }

    /// Read `reader` to the end, handing each event to `on_event`
    pub async fn consume<R, F>(mut self, mut reader: R, mut on_event: F) -> RelayResult<WireEvent>
    where
        R: AsyncRead + Unpin,
        F: FnMut(&WireEvent),
    {
        let mut buf = [0u8; 4096];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return self.finish();
            }
            for event in self.feed(&buf[..n])? {
                on_event(&event);
            }
        }
    }
}

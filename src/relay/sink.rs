//! Event Sinks
//!
//! Destinations a relay pushes wire events to. Every `send` is flushed
//! before it returns.

use super::wire::{WireEvent, WireEventKind};
use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// A push destination for wire events
#[async_trait]
pub trait EventSink: Send {
    /// Push one event and flush it to the client
    async fn send(&mut self, event: &WireEvent) -> io::Result<()>;

    /// Probe the client while no event is due. Fails once it is gone.
    async fn keep_alive(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Called once after the terminal event
    async fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// SSE comment frame; ignored by clients
pub const KEEP_ALIVE_FRAME: &[u8] = b": keep-alive\n\n";

/// Server-sent-events frames over any async writer
#[derive(Debug)]
pub struct SseSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> SseSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> EventSink for SseSink<W> {
    async fn send(&mut self, event: &WireEvent) -> io::Result<()> {
        let frame = event
            .to_sse_frame()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.flush().await
    }

    async fn keep_alive(&mut self) -> io::Result<()> {
        self.writer.write_all(KEEP_ALIVE_FRAME).await?;
        self.writer.flush().await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

/// Operator console: remote stdout to `out`, remote stderr and the final
/// status line to `err`
#[derive(Debug)]
pub struct TextSink<O, E> {
    out: O,
    err: E,
}

impl<O, E> TextSink<O, E>
where
    O: AsyncWrite + Unpin + Send,
    E: AsyncWrite + Unpin + Send,
{
    pub fn new(out: O, err: E) -> Self {
        Self { out, err }
    }
}

#[async_trait]
impl<O, E> EventSink for TextSink<O, E>
where
    O: AsyncWrite + Unpin + Send,
    E: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, event: &WireEvent) -> io::Result<()> {
        match event.kind {
            WireEventKind::Stdout => {
                self.out.write_all(event.payload.as_bytes()).await?;
                self.out.flush().await
            }
            WireEventKind::Stderr => {
                self.err.write_all(event.payload.as_bytes()).await?;
                self.err.flush().await
            }
            WireEventKind::Done => {
                self.out.flush().await?;
                self.err.write_all(b"[done]\n").await?;
                self.err.flush().await
            }
            WireEventKind::Error => {
                self.out.flush().await?;
                let line = format!("[error] {}\n", event.payload);
                self.err.write_all(line.as_bytes()).await?;
                self.err.flush().await
            }
        }
    }
}

/// In-process sink backed by a bounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<WireEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<WireEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&mut self, event: &WireEvent) -> io::Result<()> {
        self.tx
            .send(event.clone())
            .await
            .map_err(|_| receiver_dropped())
    }

    async fn keep_alive(&mut self) -> io::Result<()> {
        if self.tx.is_closed() {
            return Err(receiver_dropped());
        }
        Ok(())
    }
}

fn receiver_dropped() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "event receiver dropped")
}

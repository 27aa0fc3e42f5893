//! Event Relay
//!
//! Adapts a streaming execution into an ordered sequence of push events
//! for a remote client. Each event is flushed as soon as it is produced.
//! A client that goes away cancels the execution, which closes the
//! session and with it the remote process.

pub mod sink;
pub mod wire;

pub use sink::{ChannelSink, EventSink, SseSink, TextSink, KEEP_ALIVE_FRAME};
pub use wire::{SseDecoder, StreamConsumer, WireEvent, WireEventKind, WireTranslator};

use crate::domain::command::ExecutionEvent;
use crate::error::{RelayError, RelayResult};
use futures::Stream;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const MISSING_TERMINAL: &str = "event stream ended without a terminal event";

/// What a finished relay delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySummary {
    /// `stdout` and `stderr` events pushed
    pub data_events: usize,
    /// The `done` or `error` event that ended the stream
    pub terminal: WireEvent,
}

impl RelaySummary {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.terminal.kind == WireEventKind::Done
    }
}

/// Event Relay
#[derive(Debug, Clone, Copy, Default)]
pub struct EventRelay {
    keepalive: Option<Duration>,
}

impl EventRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe the sink after this long without an event, so a client that
    /// left during a quiet stretch is noticed
    #[must_use]
    pub fn with_keepalive(mut self, period: Option<Duration>) -> Self {
        self.keepalive = period.filter(|p| !p.is_zero());
        self
    }

    /// Push every execution event to `sink` until the terminal one.
    ///
    /// If the sink fails (client disconnected) `cancel` is fired so the
    /// producer closes its session. If the producer ends without a terminal
    /// event, an `error` event is pushed and `ProtocolViolation` returned.
    pub async fn relay<S>(
        &self,
        mut events: mpsc::Receiver<ExecutionEvent>,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> RelayResult<RelaySummary>
    where
        S: EventSink + ?Sized,
    {
        let mut translator = WireTranslator::default();
        let mut data_events = 0;
        let mut ticker = self.keepalive.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            let next = tokio::select! {
                event = events.recv() => event,
                _ = tick(&mut ticker) => {
                    if let Err(e) = sink.keep_alive().await {
                        return Err(client_gone(e, cancel));
                    }
                    continue;
                }
            };
            let Some(event) = next else {
                break;
            };

            for wire in translator.translate(event) {
                if let Err(e) = sink.send(&wire).await {
                    return Err(client_gone(e, cancel));
                }

                if wire.is_terminal() {
                    debug!(data_events, terminal = ?wire.kind, "Relay finished");
                    if let Err(e) = sink.finish().await {
                        debug!(error = %e, "Sink finish failed after terminal event");
                    }
                    return Ok(RelaySummary {
                        data_events,
                        terminal: wire,
                    });
                }
                data_events += 1;
            }
            if let Some(interval) = ticker.as_mut() {
                interval.reset();
            }
        }

        warn!(data_events, "{MISSING_TERMINAL}");
        let _ = sink.send(&WireEvent::error(MISSING_TERMINAL)).await;
        let _ = sink.finish().await;
        Err(RelayError::violation(MISSING_TERMINAL))
    }

    /// Pull-based view of the same event sequence.
    ///
    /// Ends after the terminal event; a producer that ends without one
    /// yields a final `error` event.
    pub fn into_stream(
        &self,
        mut events: mpsc::Receiver<ExecutionEvent>,
    ) -> impl Stream<Item = WireEvent> {
        async_stream::stream! {
            let mut translator = WireTranslator::default();
            let mut terminated = false;

            while !terminated {
                let Some(event) = events.recv().await else {
                    break;
                };
                for wire in translator.translate(event) {
                    terminated = wire.is_terminal();
                    yield wire;
                }
            }

            if !terminated {
                yield WireEvent::error(MISSING_TERMINAL);
            }
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn client_gone(error: std::io::Error, cancel: &CancellationToken) -> RelayError {
    warn!(error = %error, "Client went away, cancelling execution");
    cancel.cancel();
    RelayError::Io(error)
}

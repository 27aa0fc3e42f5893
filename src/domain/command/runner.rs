//! Command Runner
//!
//! Runs the single command of a session, either to completion (buffered)
//! or forwarding output as it arrives (streaming). The session is closed on
//! every path.

use super::model::{ExecutionEvent, ExecutionResult, FailureReason, StreamOutcome};
use crate::domain::session::Session;
use crate::error::{RunError, RunResult};
use crate::infrastructure::ssh::{ChannelOutput, RemoteTransport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Capacity of the producer → consumer event channel
    pub channel_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { channel_capacity: 64 }
    }
}

/// How the remote process ended
#[derive(Debug)]
enum Exit {
    Code(u32),
    Signal(String),
}

/// Result of pumping channel output into the event channel
#[derive(Debug)]
enum Pumped {
    Terminal(ExecutionEvent),
    Cancelled,
    ConsumerGone,
}

#[derive(Debug, PartialEq, Eq)]
enum Delivery {
    Sent,
    Cancelled,
    ConsumerGone,
}

/// Command Runner
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    config: RunnerConfig,
}

impl CommandRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Run `command` to completion and collect its output.
    ///
    /// Non-zero exit fails with `NonZeroExit` carrying the captured stderr.
    pub async fn run<T: RemoteTransport>(
        &self,
        mut session: Session<T>,
        command: &str,
    ) -> RunResult<ExecutionResult> {
        let span = info_span!("run", session_id = %session.id, command);
        async move {
            let result = collect(&mut session, command).await;
            session.close().await;

            match &result {
                Ok(_) => info!("Command succeeded"),
                Err(e) => warn!(error = %e, "Command failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Run `command` and forward its output to `events` as it arrives.
    ///
    /// Exactly one terminal event is sent, always last, and the session is
    /// closed after it. Cancelling `cancel` or dropping the receiver closes
    /// the session immediately.
    pub async fn run_streaming<T: RemoteTransport>(
        &self,
        mut session: Session<T>,
        command: &str,
        events: mpsc::Sender<ExecutionEvent>,
        cancel: CancellationToken,
    ) -> StreamOutcome {
        let span = info_span!("run_streaming", session_id = %session.id, command);
        async move {
            let outcome = match pump(&mut session, command, &events, &cancel).await {
                Pumped::Terminal(event) => match deliver(&events, &cancel, event.clone()).await {
                    Delivery::Sent => {
                        session.close().await;
                        match event {
                            ExecutionEvent::Failed { reason } => StreamOutcome::Failed(reason),
                            _ => StreamOutcome::Completed,
                        }
                    }
                    Delivery::Cancelled => finish_cancelled(session, &events).await,
                    Delivery::ConsumerGone => {
                        session.close().await;
                        StreamOutcome::Abandoned
                    }
                },
                Pumped::Cancelled => finish_cancelled(session, &events).await,
                Pumped::ConsumerGone => {
                    session.close().await;
                    StreamOutcome::Abandoned
                }
            };

            match &outcome {
                StreamOutcome::Completed => info!("Streaming command completed"),
                other => warn!(outcome = ?other, "Streaming command did not complete"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Spawn `run_streaming` on the runtime and hand back the event receiver.
    ///
    /// The channel is bounded by `channel_capacity`.
    pub fn spawn_streaming<T: RemoteTransport>(
        &self,
        session: Session<T>,
        command: String,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<ExecutionEvent>, JoinHandle<StreamOutcome>) {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let runner = self.clone();
        let handle =
            tokio::spawn(async move { runner.run_streaming(session, &command, tx, cancel).await });
        (rx, handle)
    }
}

async fn collect<T: RemoteTransport>(
    session: &mut Session<T>,
    command: &str,
) -> RunResult<ExecutionResult> {
    session.start(command).await?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit = None;

    while let Some(output) = session.next_output().await? {
        match output {
            ChannelOutput::Stdout(data) => stdout.extend_from_slice(&data),
            ChannelOutput::Stderr(data) => stderr.extend_from_slice(&data),
            ChannelOutput::ExitStatus(code) => exit = Some(Exit::Code(code)),
            ChannelOutput::ExitSignal(signal) => exit = Some(Exit::Signal(signal)),
        }
    }

    let stdout = String::from_utf8_lossy(&stdout).into_owned();
    let stderr = String::from_utf8_lossy(&stderr).into_owned();
    debug!(stdout_len = stdout.len(), stderr_len = stderr.len(), exit = ?exit, "Channel closed");

    match exit {
        Some(Exit::Code(0)) => Ok(ExecutionResult {
            stdout,
            stderr,
            exit_code: 0,
        }),
        Some(Exit::Code(code)) => Err(RunError::NonZeroExit { code, stderr }),
        Some(Exit::Signal(signal)) => Err(RunError::Signalled { signal, stderr }),
        None => Err(RunError::transport(
            "channel closed before the command reported an exit status",
        )),
    }
}

async fn pump<T: RemoteTransport>(
    session: &mut Session<T>,
    command: &str,
    events: &mpsc::Sender<ExecutionEvent>,
    cancel: &CancellationToken,
) -> Pumped {
    if let Err(e) = session.start(command).await {
        return Pumped::Terminal(ExecutionEvent::failed(FailureReason::Transport(e.to_string())));
    }

    let mut exit = None;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Pumped::Cancelled,
            _ = events.closed() => return Pumped::ConsumerGone,
            next = session.next_output() => next,
        };

        let event = match next {
            Ok(None) => break,
            Ok(Some(ChannelOutput::Stdout(data))) => ExecutionEvent::StdoutChunk(data),
            Ok(Some(ChannelOutput::Stderr(data))) => ExecutionEvent::StderrChunk(data),
            Ok(Some(ChannelOutput::ExitStatus(code))) => {
                exit = Some(Exit::Code(code));
                continue;
            }
            Ok(Some(ChannelOutput::ExitSignal(signal))) => {
                exit = Some(Exit::Signal(signal));
                continue;
            }
            Err(e) => {
                let reason = match e {
                    RunError::Transport { reason } => reason,
                    other => other.to_string(),
                };
                return Pumped::Terminal(ExecutionEvent::failed(FailureReason::Transport(reason)));
            }
        };

        match deliver(events, cancel, event).await {
            Delivery::Sent => {}
            Delivery::Cancelled => return Pumped::Cancelled,
            Delivery::ConsumerGone => return Pumped::ConsumerGone,
        }
    }

    let terminal = match exit {
        Some(Exit::Code(0)) => ExecutionEvent::Completed,
        Some(Exit::Code(code)) => ExecutionEvent::failed(FailureReason::ExitCode(code)),
        Some(Exit::Signal(signal)) => ExecutionEvent::failed(FailureReason::Signal(signal)),
        None => ExecutionEvent::failed(FailureReason::Transport(
            "channel closed before the command reported an exit status".to_string(),
        )),
    };
    Pumped::Terminal(terminal)
}

/// Close the session, then report the cancellation as the terminal event.
///
/// The send waits for capacity so the event lands behind buffered chunks;
/// a dropped receiver fails it instead.
async fn finish_cancelled<T: RemoteTransport>(
    session: Session<T>,
    events: &mpsc::Sender<ExecutionEvent>,
) -> StreamOutcome {
    session.close().await;
    if events.send(ExecutionEvent::failed(FailureReason::Cancelled)).await.is_err() {
        debug!("Consumer gone before the cancellation event");
    }
    StreamOutcome::Cancelled
}

/// Send one event, waiting for capacity but never past cancellation
async fn deliver(
    events: &mpsc::Sender<ExecutionEvent>,
    cancel: &CancellationToken,
    event: ExecutionEvent,
) -> Delivery {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Delivery::Cancelled,
        sent = events.send(event) => match sent {
            Ok(()) => Delivery::Sent,
            Err(_) => Delivery::ConsumerGone,
        },
    }
}

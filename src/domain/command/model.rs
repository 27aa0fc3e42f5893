//! Command Execution Model
//!
//! Results of buffered execution and events of streaming execution.

use bytes::Bytes;
use serde::Serialize;
use std::fmt;

/// Outcome of a buffered command that exited with status 0
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: u32,
}

/// Why a streaming execution failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The remote process exited non-zero
    ExitCode(u32),
    /// The remote process was killed by a signal
    Signal(String),
    /// The connection was lost before the process reported an exit
    Transport(String),
    /// The execution was cancelled locally
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ExitCode(code) => write!(f, "Process exited with code {code}"),
            FailureReason::Signal(signal) => write!(f, "Process killed by signal {signal}"),
            FailureReason::Transport(reason) => write!(f, "Transport error: {reason}"),
            FailureReason::Cancelled => f.write_str("Cancelled"),
        }
    }
}

/// One step of a streaming execution.
///
/// Data events of one stream arrive in production order. Exactly one
/// terminal event (`Completed` or `Failed`) ends the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    StdoutChunk(Bytes),
    StderrChunk(Bytes),
    Completed,
    Failed { reason: FailureReason },
}

impl ExecutionEvent {
    pub fn failed(reason: FailureReason) -> Self {
        ExecutionEvent::Failed { reason }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionEvent::Completed | ExecutionEvent::Failed { .. })
    }
}

/// How a streaming execution ended, from the producer's side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// `Completed` was delivered
    Completed,
    /// `Failed` was delivered
    Failed(FailureReason),
    /// The cancellation token fired; the session was closed early
    Cancelled,
    /// The consumer went away; the session was closed early
    Abandoned,
}

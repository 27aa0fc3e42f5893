//! Command Execution
//!
//! Buffered and streaming execution of one command per session.

pub mod model;
pub mod runner;

pub use model::{ExecutionEvent, ExecutionResult, FailureReason, StreamOutcome};
pub use runner::{CommandRunner, RunnerConfig};

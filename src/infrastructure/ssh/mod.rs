//! Remote shell transport
//!
//! A `Connector` opens an authenticated transport to the device; a
//! `RemoteTransport` runs one command on it and yields the raw channel
//! output in arrival order.

pub mod client;
#[doc(hidden)]
pub mod scripted;

pub use client::{SshConnector, SshConnectorConfig};
pub use scripted::{ScriptStep, ScriptedConnector, ScriptedStats};

use crate::credentials::Credentials;
use crate::error::{RunResult, SessionResult};
use async_trait::async_trait;
use bytes::Bytes;

/// Raw output observed on an exec channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutput {
    /// Data on the remote stdout
    Stdout(Bytes),
    /// Data on the remote stderr
    Stderr(Bytes),
    /// The remote process exited with this status
    ExitStatus(u32),
    /// The remote process was terminated by a signal
    ExitSignal(String),
}

/// Opens transports to a remote device
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: RemoteTransport;

    /// Establish and authenticate a transport.
    ///
    /// Implementations must not retry; retry policy belongs to the caller.
    async fn connect(&self, credentials: &Credentials) -> SessionResult<Self::Transport>;
}

/// An authenticated transport able to run a single command
#[async_trait]
pub trait RemoteTransport: Send + 'static {
    /// Start `command` on a fresh exec channel
    async fn exec(&mut self, command: &str) -> RunResult<()>;

    /// Next piece of channel output.
    ///
    /// `Ok(None)` means the channel has closed. Errors mean the connection
    /// was lost while the command was in flight.
    async fn next_output(&mut self) -> RunResult<Option<ChannelOutput>>;

    /// Tear down the channel and the connection
    async fn close(&mut self);
}

//! Session Management
//!
//! Opens one authenticated session per request and guarantees that every
//! opened session is closed exactly once.

use crate::credentials::Credentials;
use crate::error::{RunError, RunResult, SessionResult};
use crate::infrastructure::ssh::{ChannelOutput, Connector, RemoteTransport};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Session identifier
pub type SessionId = Uuid;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Authenticated, no command started yet
    Ready,
    /// The single command of this session is running
    Running,
    /// Transport torn down
    Closed,
}

/// An open, authenticated handle to the device.
///
/// Owned by the request that opened it. Accepts exactly one command. If it
/// is dropped while still open (a cancelled future, a panic in the caller),
/// the close is scheduled on the current tokio runtime.
pub struct Session<T: RemoteTransport> {
    /// Unique session ID
    pub id: SessionId,
    target: String,
    state: SessionState,
    transport: Option<T>,
    opened_at: Instant,
}

impl<T: RemoteTransport> Session<T> {
    fn new(target: String, transport: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            state: SessionState::Ready,
            transport: Some(transport),
            opened_at: Instant::now(),
        }
    }

    /// Get the current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// `user@host[:port]` of the device
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Start the session's one command
    pub(crate) async fn start(&mut self, command: &str) -> RunResult<()> {
        if self.state != SessionState::Ready {
            return Err(RunError::transport(format!(
                "session {} cannot run another command (state: {:?})",
                self.id, self.state
            )));
        }
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| RunError::transport("session already closed"))?;

        transport.exec(command).await?;
        self.state = SessionState::Running;
        debug!(session_id = %self.id, command, "Command started");
        Ok(())
    }

    /// Next piece of output from the running command
    pub(crate) async fn next_output(&mut self) -> RunResult<Option<ChannelOutput>> {
        match self.transport.as_mut() {
            Some(transport) => transport.next_output().await,
            None => Err(RunError::transport("session already closed")),
        }
    }

    /// Close the session
    pub async fn close(mut self) {
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
            self.state = SessionState::Closed;
            info!(
                session_id = %self.id,
                device = %self.target,
                elapsed_ms = self.opened_at.elapsed().as_millis() as u64,
                "Session closed"
            );
        }
    }
}

impl<T: RemoteTransport> Drop for Session<T> {
    fn drop(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(
                    session_id = %self.id,
                    device = %self.target,
                    "Session dropped while open, closing"
                );
                runtime.spawn(async move {
                    transport.close().await;
                });
            }
            Err(_) => {
                warn!(
                    session_id = %self.id,
                    device = %self.target,
                    "Session dropped outside a runtime; transport released without orderly close"
                );
            }
        }
    }
}

impl<T: RemoteTransport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Opens sessions through a connector.
///
/// Holds no session state: nothing is pooled or reused across requests.
#[derive(Debug, Clone)]
pub struct SessionManager<C> {
    connector: C,
}

impl<C: Connector> SessionManager<C> {
    pub fn new(connector: C) -> Self {
        Self { connector }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Open a session.
    ///
    /// Incomplete credentials fail with `MissingCredentials` before any
    /// network operation. No retry is attempted.
    pub async fn open(&self, credentials: &Credentials) -> SessionResult<Session<C::Transport>> {
        credentials.validate()?;

        let target = credentials.connection_string();
        debug!(device = %target, "Opening session");

        let transport = self.connector.connect(credentials).await.map_err(|e| {
            warn!(device = %target, error = %e, "Session open failed");
            e
        })?;

        let session = Session::new(target, transport);
        info!(session_id = %session.id, device = %session.target, "Session ready");
        Ok(session)
    }
}

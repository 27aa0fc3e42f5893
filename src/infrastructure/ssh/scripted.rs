//! Scripted in-process transport
//!
//! Replays canned channel output instead of talking to a device, and counts
//! connects, closes and executed commands. Used by the test suites.

use super::{ChannelOutput, Connector, RemoteTransport};
use crate::credentials::Credentials;
use crate::error::{ConnectFailure, RunError, RunResult, SessionError, SessionResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted step of remote behaviour
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Stdout(Bytes),
    Stderr(Bytes),
    Exit(u32),
    Signal(String),
    /// Connection drops with this reason
    Drop(String),
    /// Wait before the next step
    Pause(Duration),
    /// Never produce anything again
    Hang,
}

impl ScriptStep {
    pub fn stdout(text: impl AsRef<[u8]>) -> Self {
        ScriptStep::Stdout(Bytes::copy_from_slice(text.as_ref()))
    }

    pub fn stderr(text: impl AsRef<[u8]>) -> Self {
        ScriptStep::Stderr(Bytes::copy_from_slice(text.as_ref()))
    }
}

/// Counters shared between a connector and every transport it opened
#[derive(Debug, Default)]
pub struct ScriptedStats {
    connects: AtomicUsize,
    closes: AtomicUsize,
    double_closes: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

impl ScriptedStats {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn double_closes(&self) -> usize {
        self.double_closes.load(Ordering::SeqCst)
    }

    /// Transports opened but not yet closed
    pub fn open_transports(&self) -> usize {
        self.connects().saturating_sub(self.closes())
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

/// Connector replaying scripted output per command
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    scripts: HashMap<String, Vec<ScriptStep>>,
    fallback: Option<Vec<ScriptStep>>,
    connect_failure: Option<(ConnectFailure, String)>,
    stats: Arc<ScriptedStats>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the output of an exact command string
    #[must_use]
    pub fn on(mut self, command: impl Into<String>, steps: Vec<ScriptStep>) -> Self {
        self.scripts.insert(command.into(), steps);
        self
    }

    /// Script used for any command without its own script
    #[must_use]
    pub fn otherwise(mut self, steps: Vec<ScriptStep>) -> Self {
        self.fallback = Some(steps);
        self
    }

    /// Make every connect attempt fail
    #[must_use]
    pub fn refuse(mut self, kind: ConnectFailure, cause: impl Into<String>) -> Self {
        self.connect_failure = Some((kind, cause.into()));
        self
    }

    pub fn stats(&self) -> Arc<ScriptedStats> {
        Arc::clone(&self.stats)
    }

    fn script_for(&self, command: &str) -> Vec<ScriptStep> {
        self.scripts
            .get(command)
            .or(self.fallback.as_ref())
            .cloned()
            .unwrap_or_else(|| {
                vec![
                    ScriptStep::stderr(format!("sh: {command}: not found\n")),
                    ScriptStep::Exit(127),
                ]
            })
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Transport = ScriptedTransport;

    async fn connect(&self, credentials: &Credentials) -> SessionResult<ScriptedTransport> {
        if let Some((kind, cause)) = &self.connect_failure {
            return Err(SessionError::connect(credentials.connection_string(), *kind, cause));
        }
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedTransport {
            connector: self.clone(),
            pending: VecDeque::new(),
            started: false,
            closed: false,
        })
    }
}

/// Transport handed out by [`ScriptedConnector`]
#[derive(Debug)]
pub struct ScriptedTransport {
    connector: ScriptedConnector,
    pending: VecDeque<ScriptStep>,
    started: bool,
    closed: bool,
}

#[async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn exec(&mut self, command: &str) -> RunResult<()> {
        if self.closed {
            return Err(RunError::transport("connection already closed"));
        }
        if let Ok(mut commands) = self.connector.stats.commands.lock() {
            commands.push(command.to_string());
        }
        self.pending = self.connector.script_for(command).into();
        self.started = true;
        Ok(())
    }

    async fn next_output(&mut self) -> RunResult<Option<ChannelOutput>> {
        if !self.started {
            return Err(RunError::transport("no command running on this connection"));
        }
        loop {
            let Some(step) = self.pending.pop_front() else {
                return Ok(None);
            };
            let output = match step {
                ScriptStep::Stdout(data) => ChannelOutput::Stdout(data),
                ScriptStep::Stderr(data) => ChannelOutput::Stderr(data),
                ScriptStep::Exit(code) => ChannelOutput::ExitStatus(code),
                ScriptStep::Signal(name) => ChannelOutput::ExitSignal(name),
                ScriptStep::Drop(reason) => {
                    self.pending.clear();
                    return Err(RunError::transport(reason));
                }
                ScriptStep::Pause(delay) => {
                    tokio::time::sleep(delay).await;
                    continue;
                }
                ScriptStep::Hang => std::future::pending().await,
            };
            return Ok(Some(output));
        }
    }

    async fn close(&mut self) {
        if self.closed {
            self.connector.stats.double_closes.fetch_add(1, Ordering::SeqCst);
            return;
        }
        self.closed = true;
        self.pending.clear();
        self.connector.stats.closes.fetch_add(1, Ordering::SeqCst);
    }
}

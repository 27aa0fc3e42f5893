//! SSH transport backed by russh

use super::{ChannelOutput, Connector, RemoteTransport};
use crate::credentials::{Credentials, Secret};
use crate::error::{ConnectFailure, RunError, RunResult, SessionError, SessionResult};
use async_trait::async_trait;
use bytes::Bytes;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// SSH extended data stream number for stderr
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// Tunables for the russh connector
#[derive(Debug, Clone)]
pub struct SshConnectorConfig {
    /// Bound on TCP connect + handshake + authentication
    pub connect_timeout: Duration,
    /// Keepalive interval for long-running commands (None = disabled)
    pub keepalive_interval: Option<Duration>,
}

impl Default for SshConnectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            keepalive_interval: None,
        }
    }
}

/// Connector that opens real SSH sessions
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    config: SshConnectorConfig,
}

impl SshConnector {
    #[must_use]
    pub fn new(config: SshConnectorConfig) -> Self {
        Self { config }
    }

    async fn establish(
        &self,
        credentials: &Credentials,
        target: &str,
    ) -> SessionResult<Handle<DeviceHandler>> {
        let config = Arc::new(client::Config {
            keepalive_interval: self.config.keepalive_interval,
            ..Default::default()
        });
        let handler = DeviceHandler {
            target: target.to_string(),
        };

        let address = (credentials.host.as_str(), credentials.port);
        let mut handle = client::connect(config, address, handler)
            .await
            .map_err(|e| classify(target, e))?;

        let authenticated = match &credentials.secret {
            Secret::Password(password) => handle
                .authenticate_password(credentials.username.as_str(), password.as_str())
                .await
                .map_err(|e| classify(target, e))?,
            Secret::KeyFile { passphrase, .. } => {
                let path = credentials.secret.expanded_key_path().unwrap_or_default();
                let key_pair =
                    russh_keys::load_secret_key(&path, passphrase.as_deref()).map_err(|e| {
                        SessionError::connect(
                            target,
                            ConnectFailure::AuthenticationRejected,
                            format!("cannot load private key {}: {e}", path.display()),
                        )
                    })?;
                handle
                    .authenticate_publickey(credentials.username.as_str(), Arc::new(key_pair))
                    .await
                    .map_err(|e| classify(target, e))?
            }
        };

        if !authenticated {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(SessionError::connect(
                target,
                ConnectFailure::AuthenticationRejected,
                format!("server rejected credentials for user '{}'", credentials.username),
            ));
        }

        Ok(handle)
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Transport = SshTransport;

    async fn connect(&self, credentials: &Credentials) -> SessionResult<SshTransport> {
        let target = credentials.connection_string();
        let timeout = self.config.connect_timeout;

        let established = tokio::time::timeout(timeout, self.establish(credentials, &target)).await;
        let handle = match established {
            Ok(result) => result?,
            Err(_) => {
                return Err(SessionError::connect(
                    target,
                    ConnectFailure::Timeout,
                    format!("no session within {}s", timeout.as_secs()),
                ))
            }
        };

        debug!(device = %target, "SSH session authenticated");
        Ok(SshTransport {
            target,
            handle: Some(handle),
            channel: None,
        })
    }
}

fn classify(target: &str, err: russh::Error) -> SessionError {
    let kind = match &err {
        russh::Error::IO(_) => ConnectFailure::Unreachable,
        _ => ConnectFailure::Protocol,
    };
    SessionError::connect(target, kind, err)
}

/// russh client handler
///
/// Routers are addressed by LAN IP and rotate keys on reflash, so host keys
/// are accepted and only logged.
pub struct DeviceHandler {
    target: String,
}

#[async_trait]
impl client::Handler for DeviceHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            device = %self.target,
            fingerprint = %server_public_key.fingerprint(),
            "Accepting host key"
        );
        Ok(true)
    }
}

/// One authenticated SSH connection running at most one exec channel
pub struct SshTransport {
    target: String,
    handle: Option<Handle<DeviceHandler>>,
    channel: Option<Channel<Msg>>,
}

#[async_trait]
impl RemoteTransport for SshTransport {
    async fn exec(&mut self, command: &str) -> RunResult<()> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| RunError::transport("connection already closed"))?;

        let mut channel = handle.channel_open_session().await.map_err(RunError::transport)?;
        channel.exec(true, command).await.map_err(RunError::transport)?;
        self.channel = Some(channel);
        Ok(())
    }

    async fn next_output(&mut self) -> RunResult<Option<ChannelOutput>> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| RunError::transport("no command running on this connection"))?;

        loop {
            let output = match channel.wait().await {
                None | Some(ChannelMsg::Close) => return Ok(None),
                Some(ChannelMsg::Data { data }) => {
                    ChannelOutput::Stdout(Bytes::copy_from_slice(&data))
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext != SSH_EXTENDED_DATA_STDERR {
                        continue;
                    }
                    ChannelOutput::Stderr(Bytes::copy_from_slice(&data))
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    ChannelOutput::ExitStatus(exit_status)
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    ChannelOutput::ExitSignal(format!("{signal_name:?}"))
                }
                Some(_) => continue,
            };
            return Ok(Some(output));
        }
    }

    async fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                debug!(device = %self.target, error = %e, "Exec channel already gone");
            }
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.disconnect(Disconnect::ByApplication, "", "en").await {
                warn!(device = %self.target, error = %e, "SSH disconnect failed");
            }
        }
    }
}

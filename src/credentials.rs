//! Per-request SSH credentials
//!
//! Credentials are supplied fresh with every operation. They are never
//! cached, pooled, or written anywhere by this crate.

use crate::error::{SessionError, SessionResult};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Authentication secret
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Secret {
    /// Password authentication
    Password(String),
    /// Private key file, with optional passphrase
    KeyFile {
        path: PathBuf,
        #[serde(default)]
        passphrase: Option<String>,
    },
}

impl Secret {
    fn is_empty(&self) -> bool {
        match self {
            Secret::Password(password) => password.is_empty(),
            Secret::KeyFile { path, .. } => path.as_os_str().is_empty(),
        }
    }

    /// Key file path with `~` expanded
    #[must_use]
    pub fn expanded_key_path(&self) -> Option<PathBuf> {
        match self {
            Secret::Password(_) => None,
            Secret::KeyFile { path, .. } => {
                let raw = path.display().to_string();
                let expanded = shellexpand::tilde(&raw);
                Some(PathBuf::from(expanded.as_ref()))
            }
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Secret::Password(_) => f.write_str("Password(<redacted>)"),
            Secret::KeyFile { path, .. } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .finish_non_exhaustive(),
        }
    }
}

/// Identity used to open one session against the device
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    /// Remote host (hostname or IP)
    pub host: String,
    /// SSH port (default: 22)
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Login user
    pub username: String,
    /// Password or key
    pub secret: Secret,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl Credentials {
    /// Password credentials on the default port
    pub fn with_password(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            secret: Secret::Password(password.into()),
        }
    }

    /// Key-file credentials on the default port
    pub fn with_key_file(
        host: impl Into<String>,
        username: impl Into<String>,
        path: impl Into<PathBuf>,
        passphrase: Option<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            secret: Secret::KeyFile {
                path: path.into(),
                passphrase,
            },
        }
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Reject incomplete identities before any network attempt
    pub fn validate(&self) -> SessionResult<()> {
        if self.host.trim().is_empty() {
            return Err(SessionError::MissingCredentials { field: "host" });
        }
        if self.username.trim().is_empty() {
            return Err(SessionError::MissingCredentials { field: "username" });
        }
        if self.secret.is_empty() {
            return Err(SessionError::MissingCredentials { field: "secret" });
        }
        Ok(())
    }

    /// Get the connection string for display (e.g., "user@host:port")
    pub fn connection_string(&self) -> String {
        let port_part = if self.port != DEFAULT_SSH_PORT {
            format!(":{}", self.port)
        } else {
            String::new()
        };

        format!("{}@{}{}", self.username, self.host, port_part)
    }
}

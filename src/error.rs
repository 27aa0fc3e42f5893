//! `routerpkg` Error Types
//!
//! Centralized error handling using thiserror for type-safe errors.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for `routerpkg`
#[derive(Error, Debug)]
pub enum RouterPkgError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Command error: {0}")]
    Run(#[from] RunError),

    #[error("Invalid request: {0}")]
    Request(#[from] RequestError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a session could not be established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    /// The device answered but rejected the credentials
    AuthenticationRejected,
    /// The device could not be reached at all
    Unreachable,
    /// Connection establishment did not finish in time
    Timeout,
    /// SSH handshake or protocol failure
    Protocol,
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectFailure::AuthenticationRejected => "authentication rejected",
            ConnectFailure::Unreachable => "host unreachable",
            ConnectFailure::Timeout => "connection timed out",
            ConnectFailure::Protocol => "protocol error",
        };
        f.write_str(label)
    }
}

/// Session establishment errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Missing credentials: {field} is required")]
    MissingCredentials { field: &'static str },

    #[error("Connection to '{target}' failed ({kind}): {cause}")]
    Connect {
        target: String,
        kind: ConnectFailure,
        cause: String,
    },
}

impl SessionError {
    pub fn connect(
        target: impl Into<String>,
        kind: ConnectFailure,
        cause: impl fmt::Display,
    ) -> Self {
        SessionError::Connect {
            target: target.into(),
            kind,
            cause: cause.to_string(),
        }
    }

    /// The connect failure kind, if this is a connect error
    #[must_use]
    pub fn connect_failure(&self) -> Option<ConnectFailure> {
        match self {
            SessionError::Connect { kind, .. } => Some(*kind),
            SessionError::MissingCredentials { .. } => None,
        }
    }
}

/// Errors while running a command on an established session
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Connection lost during command: {reason}")]
    Transport { reason: String },

    #[error("Command failed with code {code}: {stderr}")]
    NonZeroExit { code: u32, stderr: String },

    #[error("Command killed by signal {signal}: {stderr}")]
    Signalled { signal: String, stderr: String },
}

impl RunError {
    pub fn transport(reason: impl fmt::Display) -> Self {
        RunError::Transport {
            reason: reason.to_string(),
        }
    }
}

/// Non-fatal parse errors; the offending line or block is skipped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("line has no package name")]
    MissingName,

    #[error("expected at least {expected} fields, found {found}")]
    TooFewFields { expected: usize, found: usize },

    #[error("block has no Package key")]
    MissingPackageKey,
}

/// Event relay errors
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    #[error("Event transport I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed event: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RelayError {
    pub fn violation(reason: impl Into<String>) -> Self {
        RelayError::ProtocolViolation {
            reason: reason.into(),
        }
    }
}

/// Rejected requests, detected before any connection is made
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("No packages specified")]
    NoPackages,

    #[error("Invalid package name '{name}'")]
    InvalidPackageName { name: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

/// Result type alias for `routerpkg` operations
pub type Result<T> = std::result::Result<T, RouterPkgError>;

/// Result type alias for session operations
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Result type alias for command execution
pub type RunResult<T> = std::result::Result<T, RunError>;

/// Result type alias for relay operations
pub type RelayResult<T> = std::result::Result<T, RelayError>;

/// Result type alias for Config operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

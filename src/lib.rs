//! routerpkg Library
//!
//! Remote package management for opkg-based routers over SSH:
//! - Per-request SSH sessions, one command each, always closed
//! - Buffered and streaming command execution
//! - Best-effort parsing of opkg listings and detail blocks
//! - Relay of streaming output to a remote client as push events

pub mod app;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod logging;
pub mod relay;

pub use app::{PackageService, Request, Response};
pub use config::AppConfig;
pub use credentials::{Credentials, Secret};
pub use error::{Result, RouterPkgError};
pub use relay::{EventRelay, RelaySummary, WireEvent, WireEventKind};

//! Session Management
//!
//! Session lifecycle: connect, run one command, close.

pub mod manager;

pub use manager::{Session, SessionId, SessionManager, SessionState};

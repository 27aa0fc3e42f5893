//! Application Layer
//!
//! Request handling on top of the session, runner and opkg domain pieces.

pub mod service;

pub use service::{PackageService, Request, Response, StreamingUpgrade, LISTS_REFRESHED};

//! Domain Layer
//!
//! Session lifecycle, command execution, and package-manager semantics.

pub mod command;
pub mod opkg;
pub mod session;

//! opkg Package Manager
//!
//! Command construction and output parsing for the device's package manager.

pub mod commands;
pub mod parser;

pub use commands::{CommandIntent, OpkgCommands, UpgradeFlags};
pub use parser::{
    parse_details, parse_installed, parse_upgradable, InstalledPackage, PackageDetail,
    UpgradablePackage,
};

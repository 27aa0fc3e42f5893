//! opkg Command Construction
//!
//! Turns an operator intent into the one command string a session runs.

use crate::error::RequestError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

/// Package names accepted on a command line
static PACKAGE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._+-]*$").expect("valid package name regex"));

/// Command used to prove a session can run commands
pub const CONNECTIVITY_PROBE: &str = "echo \"Connection Successful\"";

/// Options for an upgrade
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpgradeFlags {
    /// Allow overwriting files owned by other packages
    pub force_overwrite: bool,
    /// Operator asked for matching translation packages too.
    ///
    /// Carried through unchanged: how translation packages are found is not
    /// decided here, so the command is not altered.
    pub install_translations: bool,
}

/// What the operator wants done on the device
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "intent", rename_all = "kebab-case")]
pub enum CommandIntent {
    ConnectivityCheck,
    RefreshLists,
    ListInstalled,
    ListUpgradable,
    Detail {
        packages: Vec<String>,
    },
    Upgrade {
        packages: Vec<String>,
        #[serde(default)]
        flags: UpgradeFlags,
    },
}

/// Builds command strings for a given opkg binary
#[derive(Debug, Clone)]
pub struct OpkgCommands {
    binary: String,
}

impl Default for OpkgCommands {
    fn default() -> Self {
        Self::new("opkg")
    }
}

impl OpkgCommands {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    /// Command string for `intent`
    pub fn build(&self, intent: &CommandIntent) -> Result<String, RequestError> {
        let command = match intent {
            CommandIntent::ConnectivityCheck => CONNECTIVITY_PROBE.to_string(),
            CommandIntent::RefreshLists => format!("{} update", self.binary),
            CommandIntent::ListInstalled => format!("{} list-installed", self.binary),
            CommandIntent::ListUpgradable => format!("{} list-upgradable", self.binary),
            CommandIntent::Detail { packages } => {
                format!("{} info {}", self.binary, package_args(packages)?)
            }
            CommandIntent::Upgrade { packages, flags } => {
                let packages = package_args(packages)?;
                if flags.install_translations {
                    debug!("install_translations requested; command left unchanged");
                }
                let mut command = format!("{} upgrade", self.binary);
                if flags.force_overwrite {
                    command.push_str(" --force-overwrite");
                }
                command.push(' ');
                command.push_str(&packages);
                command
            }
        };
        Ok(command)
    }
}

/// Validate package names and join them for the command line
pub fn package_args(packages: &[String]) -> Result<String, RequestError> {
    if packages.is_empty() {
        return Err(RequestError::NoPackages);
    }
    for name in packages {
        if !PACKAGE_NAME.is_match(name) {
            return Err(RequestError::InvalidPackageName { name: name.clone() });
        }
    }
    Ok(packages.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fixed_commands() {
        let commands = OpkgCommands::default();
        assert_eq!(
            commands.build(&CommandIntent::ConnectivityCheck).unwrap(),
            "echo \"Connection Successful\""
        );
        assert_eq!(commands.build(&CommandIntent::RefreshLists).unwrap(), "opkg update");
        assert_eq!(commands.build(&CommandIntent::ListInstalled).unwrap(), "opkg list-installed");
        assert_eq!(commands.build(&CommandIntent::ListUpgradable).unwrap(), "opkg list-upgradable");
    }

    #[test]
    fn test_upgrade_flags() {
        let commands = OpkgCommands::default();
        let intent = CommandIntent::Upgrade {
            packages: names(&["luci-base", "libustream-wolfssl20201210"]),
            flags: UpgradeFlags::default(),
        };
        assert_eq!(
            commands.build(&intent).unwrap(),
            "opkg upgrade luci-base libustream-wolfssl20201210"
        );

        let intent = CommandIntent::Upgrade {
            packages: names(&["luci-base"]),
            flags: UpgradeFlags {
                force_overwrite: true,
                install_translations: true,
            },
        };
        assert_eq!(commands.build(&intent).unwrap(), "opkg upgrade --force-overwrite luci-base");
    }

    #[test]
    fn test_detail_command() {
        let commands = OpkgCommands::new("/bin/opkg");
        let intent = CommandIntent::Detail {
            packages: names(&["uhttpd", "libc++"]),
        };
        assert_eq!(commands.build(&intent).unwrap(), "/bin/opkg info uhttpd libc++");
    }

    #[test]
    fn test_rejects_empty_and_unsafe_names() {
        assert_eq!(package_args(&[]), Err(RequestError::NoPackages));
        assert_eq!(
            package_args(&names(&["luci; reboot"])),
            Err(RequestError::InvalidPackageName {
                name: "luci; reboot".into()
            })
        );
        assert!(package_args(&names(&["-force"])).is_err());
        assert!(package_args(&names(&["$(id)"])).is_err());
    }

    #[test]
    fn test_intent_deserialize() {
        let intent: CommandIntent = serde_json::from_str(
            r#"{"intent":"upgrade","packages":["a"],"flags":{"forceOverwrite":true}}"#,
        )
        .unwrap();
        assert_eq!(
            intent,
            CommandIntent::Upgrade {
                packages: vec!["a".into()],
                flags: UpgradeFlags {
                    force_overwrite: true,
                    install_translations: false,
                },
            }
        );
    }
}

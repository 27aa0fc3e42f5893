//! Package Service
//!
//! One call per operator request. Every call opens its own session, runs
//! one command on it and lets the runner close it; nothing is shared or
//! cached between calls.

use crate::credentials::Credentials;
use crate::domain::command::{CommandRunner, ExecutionEvent, ExecutionResult, StreamOutcome};
use crate::domain::opkg::{
    parse_details, parse_installed, parse_upgradable, CommandIntent, InstalledPackage,
    OpkgCommands, PackageDetail, UpgradablePackage, UpgradeFlags,
};
use crate::domain::session::SessionManager;
use crate::error::Result;
use crate::infrastructure::ssh::Connector;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Acknowledgement returned after the package lists were refreshed
pub const LISTS_REFRESHED: &str = "Package lists updated";

/// Inbound request: who to connect as, and what to do
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub credentials: Credentials,
    #[serde(flatten)]
    pub intent: CommandIntent,
}

/// Buffered outcome of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "data", rename_all = "camelCase")]
pub enum Response {
    Acknowledged { message: String },
    Installed(Vec<InstalledPackage>),
    Upgradable(Vec<UpgradablePackage>),
    Details(Vec<PackageDetail>),
    Upgraded { output: String },
}

/// Handle to a running streaming upgrade
pub type StreamingUpgrade = (mpsc::Receiver<ExecutionEvent>, JoinHandle<StreamOutcome>);

/// Package Service
#[derive(Debug, Clone)]
pub struct PackageService<C> {
    sessions: SessionManager<C>,
    runner: CommandRunner,
    commands: OpkgCommands,
}

impl<C: Connector> PackageService<C> {
    pub fn new(connector: C, runner: CommandRunner, commands: OpkgCommands) -> Self {
        Self {
            sessions: SessionManager::new(connector),
            runner,
            commands,
        }
    }

    pub fn sessions(&self) -> &SessionManager<C> {
        &self.sessions
    }

    /// Dispatch a buffered request
    pub async fn handle(&self, request: Request) -> Result<Response> {
        let Request { credentials, intent } = request;
        debug!(device = %credentials.connection_string(), intent = ?intent, "Handling request");

        let response = match intent {
            CommandIntent::ConnectivityCheck => Response::Acknowledged {
                message: self.check_connectivity(&credentials).await?,
            },
            CommandIntent::RefreshLists => {
                self.refresh_lists(&credentials).await?;
                Response::Acknowledged {
                    message: LISTS_REFRESHED.to_string(),
                }
            }
            CommandIntent::ListInstalled => {
                Response::Installed(self.list_installed(&credentials).await?)
            }
            CommandIntent::ListUpgradable => {
                Response::Upgradable(self.list_upgradable(&credentials).await?)
            }
            CommandIntent::Detail { packages } => {
                Response::Details(self.package_details(&credentials, &packages).await?)
            }
            CommandIntent::Upgrade { packages, flags } => Response::Upgraded {
                output: self.upgrade(&credentials, &packages, flags).await?,
            },
        };
        Ok(response)
    }

    /// Open a session and run the probe command; returns what the device echoed
    pub async fn check_connectivity(&self, credentials: &Credentials) -> Result<String> {
        let result = self.execute(credentials, &CommandIntent::ConnectivityCheck).await?;
        Ok(result.stdout.trim().to_string())
    }

    /// `opkg update`
    pub async fn refresh_lists(&self, credentials: &Credentials) -> Result<()> {
        self.execute(credentials, &CommandIntent::RefreshLists).await?;
        Ok(())
    }

    pub async fn list_installed(&self, credentials: &Credentials) -> Result<Vec<InstalledPackage>> {
        let result = self.execute(credentials, &CommandIntent::ListInstalled).await?;
        Ok(parse_installed(&result.stdout))
    }

    pub async fn list_upgradable(
        &self,
        credentials: &Credentials,
    ) -> Result<Vec<UpgradablePackage>> {
        let result = self.execute(credentials, &CommandIntent::ListUpgradable).await?;
        Ok(parse_upgradable(&result.stdout))
    }

    /// Refresh the package lists, then list what can be upgraded.
    ///
    /// The two commands run on two separate sessions. A failed refresh
    /// stops here without listing.
    pub async fn check_updates(&self, credentials: &Credentials) -> Result<Vec<UpgradablePackage>> {
        self.refresh_lists(credentials).await?;
        let packages = self.list_upgradable(credentials).await?;
        info!(count = packages.len(), "Upgradable packages found");
        Ok(packages)
    }

    pub async fn package_details(
        &self,
        credentials: &Credentials,
        packages: &[String],
    ) -> Result<Vec<PackageDetail>> {
        let intent = CommandIntent::Detail {
            packages: packages.to_vec(),
        };
        let result = self.execute(credentials, &intent).await?;
        Ok(parse_details(&result.stdout))
    }

    /// Buffered upgrade; returns the captured stdout
    pub async fn upgrade(
        &self,
        credentials: &Credentials,
        packages: &[String],
        flags: UpgradeFlags,
    ) -> Result<String> {
        let intent = CommandIntent::Upgrade {
            packages: packages.to_vec(),
            flags,
        };
        let result = self.execute(credentials, &intent).await?;
        Ok(result.stdout)
    }

    /// Start a streaming upgrade.
    ///
    /// Request and connect errors are returned directly. Once the session is
    /// open, every outcome arrives as events on the returned receiver.
    pub async fn upgrade_streaming(
        &self,
        credentials: &Credentials,
        packages: Vec<String>,
        flags: UpgradeFlags,
        cancel: CancellationToken,
    ) -> Result<StreamingUpgrade> {
        let command = self.commands.build(&CommandIntent::Upgrade { packages, flags })?;
        let session = self.sessions.open(credentials).await?;
        Ok(self.runner.spawn_streaming(session, command, cancel))
    }

    async fn execute(
        &self,
        credentials: &Credentials,
        intent: &CommandIntent,
    ) -> Result<ExecutionResult> {
        let command = self.commands.build(intent)?;
        let session = self.sessions.open(credentials).await?;
        Ok(self.runner.run(session, &command).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RequestError, RouterPkgError, RunError, SessionError};
    use crate::infrastructure::ssh::{ScriptStep, ScriptedConnector};
    use pretty_assertions::assert_eq;

    fn creds() -> Credentials {
        Credentials::with_password("192.168.1.1", "root", "secret")
    }

    fn service(connector: ScriptedConnector) -> PackageService<ScriptedConnector> {
        PackageService::new(connector, CommandRunner::default(), OpkgCommands::default())
    }

    #[tokio::test]
    async fn test_connectivity_acknowledged() {
        let connector = ScriptedConnector::new().on(
            "echo \"Connection Successful\"",
            vec![ScriptStep::stdout("Connection Successful\n"), ScriptStep::Exit(0)],
        );
        let stats = connector.stats();
        let service = service(connector);

        let message = service.check_connectivity(&creds()).await.unwrap();
        assert_eq!(message, "Connection Successful");
        assert_eq!(stats.connects(), 1);
        assert_eq!(stats.open_transports(), 0);
    }

    #[tokio::test]
    async fn test_check_updates_uses_two_sessions() {
        let connector = ScriptedConnector::new()
            .on("opkg update", vec![ScriptStep::stdout("Updated list\n"), ScriptStep::Exit(0)])
            .on(
                "opkg list-upgradable",
                vec![ScriptStep::stdout("luci-base - 1.0 - 1.1\n"), ScriptStep::Exit(0)],
            );
        let stats = connector.stats();
        let service = service(connector);

        let packages = service.check_updates(&creds()).await.unwrap();
        assert_eq!(
            packages,
            vec![UpgradablePackage {
                name: "luci-base".into(),
                current_version: "1.0".into(),
                new_version: "1.1".into(),
            }]
        );
        assert_eq!(stats.commands(), vec!["opkg update", "opkg list-upgradable"]);
        assert_eq!(stats.connects(), 2);
        assert_eq!(stats.closes(), 2);
    }

    #[tokio::test]
    async fn test_check_updates_stops_on_failed_refresh() {
        let connector = ScriptedConnector::new().on(
            "opkg update",
            vec![ScriptStep::stderr("wget returned 4\n"), ScriptStep::Exit(1)],
        );
        let stats = connector.stats();
        let service = service(connector);

        let err = service.check_updates(&creds()).await.unwrap_err();
        assert!(matches!(err, RouterPkgError::Run(RunError::NonZeroExit { code: 1, .. })));
        assert_eq!(stats.commands(), vec!["opkg update"]);
    }

    #[tokio::test]
    async fn test_invalid_request_never_connects() {
        let connector = ScriptedConnector::new();
        let stats = connector.stats();
        let service = service(connector);

        let err = service.package_details(&creds(), &[]).await.unwrap_err();
        assert!(matches!(err, RouterPkgError::Request(RequestError::NoPackages)));

        let err = service
            .upgrade_streaming(
                &creds(),
                vec!["a;b".into()],
                UpgradeFlags::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RouterPkgError::Request(RequestError::InvalidPackageName { .. })));
        assert_eq!(stats.connects(), 0);
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let service = service(ScriptedConnector::new());
        let mut credentials = creds();
        credentials.username.clear();

        let err = service.list_installed(&credentials).await.unwrap_err();
        assert!(matches!(
            err,
            RouterPkgError::Session(SessionError::MissingCredentials { field: "username" })
        ));
    }

    #[tokio::test]
    async fn test_handle_request_json() {
        let connector = ScriptedConnector::new().on(
            "opkg info uhttpd",
            vec![
                ScriptStep::stdout(
                    "Package: uhttpd\nVersion: 2023-06-25\nDepends: libc, libubox20230523\n",
                ),
                ScriptStep::Exit(0),
            ],
        );
        let service = service(connector);

        let request: Request = serde_json::from_str(
            r#"{
                "credentials": {"host": "router", "username": "root", "secret": {"password": "pw"}},
                "intent": "detail",
                "packages": ["uhttpd"]
            }"#,
        )
        .unwrap();
        let response = service.handle(request).await.unwrap();

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({
                "result": "details",
                "data": [{
                    "name": "uhttpd",
                    "version": "2023-06-25",
                    "dependencies": ["libc", "libubox20230523"]
                }]
            })
        );
    }
}

//! routerpkg - opkg package management over SSH
//!
//! Lists, inspects and upgrades packages on a router. Results are printed as
//! JSON on stdout; upgrades can stream live output instead.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use routerpkg::config::{AppConfig, LayerOutcome};
use routerpkg::credentials::Credentials;
use routerpkg::domain::command::{CommandRunner, StreamOutcome};
use routerpkg::domain::opkg::{CommandIntent, UpgradeFlags};
use routerpkg::infrastructure::SshConnector;
use routerpkg::logging::init_logging;
use routerpkg::relay::{EventRelay, EventSink, SseSink, TextSink};
use routerpkg::{PackageService, Request, Response};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "routerpkg", version, about)]
struct Cli {
    #[command(flatten)]
    target: TargetArgs,

    /// Extra configuration file, applied over the default layers
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Give up (and close the session) after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct TargetArgs {
    /// Router hostname or IP
    #[arg(long, global = true, env = "ROUTERPKG_HOST")]
    host: Option<String>,

    /// SSH login user
    #[arg(long, short = 'u', global = true, default_value = "root")]
    user: String,

    /// SSH password
    #[arg(long, global = true, env = "ROUTERPKG_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Private key file, used instead of a password
    #[arg(long, short = 'i', global = true, value_name = "FILE")]
    identity: Option<PathBuf>,

    /// Passphrase for the private key
    #[arg(long, global = true, env = "ROUTERPKG_KEY_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    /// SSH port (default from config, normally 22)
    #[arg(long, short = 'p', global = true)]
    port: Option<u16>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that the router accepts the credentials and runs commands
    Connect,
    /// Refresh the package lists (opkg update)
    Refresh,
    /// List installed packages
    List {
        /// List packages with a newer version instead
        #[arg(long)]
        upgradable: bool,
    },
    /// Refresh the package lists, then list upgradable packages
    CheckUpdates,
    /// Show package details
    Info {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Upgrade packages
    Upgrade {
        #[arg(required = true)]
        packages: Vec<String>,

        /// Allow overwriting files owned by other packages
        #[arg(long)]
        force_overwrite: bool,

        /// Ask for matching translation packages too
        #[arg(long)]
        install_translations: bool,

        /// Print output live instead of a JSON result
        #[arg(long)]
        stream: bool,

        /// Stream server-sent-event frames on stdout (implies --stream)
        #[arg(long)]
        sse: bool,
    },
}

impl TargetArgs {
    fn credentials(&self, default_port: u16) -> Credentials {
        let host = self.host.clone().unwrap_or_default();
        let credentials = match &self.identity {
            Some(path) => {
                Credentials::with_key_file(host, &self.user, path, self.passphrase.clone())
            }
            None => {
                let password = self.password.clone().unwrap_or_default();
                Credentials::with_password(host, &self.user, password)
            }
        };
        credentials.port(self.port.unwrap_or(default_port))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let (config, layers) = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_logging(&config.logging);
    layers.iter().for_each(LayerOutcome::log);

    let credentials = cli.target.credentials(config.ssh.default_port);
    let timeout = cli.timeout.map(Duration::from_secs);
    let service = PackageService::new(
        SshConnector::new(config.ssh_connector_config()),
        CommandRunner::new(config.runner_config()),
        config.opkg_commands(),
    );

    let intent = match cli.command {
        Command::Connect => CommandIntent::ConnectivityCheck,
        Command::Refresh => CommandIntent::RefreshLists,
        Command::List { upgradable: false } => CommandIntent::ListInstalled,
        Command::List { upgradable: true } => CommandIntent::ListUpgradable,
        Command::CheckUpdates => {
            let packages = interruptible(service.check_updates(&credentials), timeout).await??;
            print_json(&Response::Upgradable(packages))?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Info { packages } => CommandIntent::Detail { packages },
        Command::Upgrade {
            packages,
            force_overwrite,
            install_translations,
            stream,
            sse,
        } => {
            let flags = UpgradeFlags {
                force_overwrite,
                install_translations,
            };
            if stream || sse {
                let relay = config.event_relay();
                return stream_upgrade(
                    &service,
                    relay,
                    &credentials,
                    packages,
                    flags,
                    timeout,
                    sse,
                )
                .await;
            }
            CommandIntent::Upgrade { packages, flags }
        }
    };

    let response = interruptible(service.handle(Request { credentials, intent }), timeout).await??;
    print_json(&response)?;
    Ok(ExitCode::SUCCESS)
}

async fn stream_upgrade(
    service: &PackageService<SshConnector>,
    relay: EventRelay,
    credentials: &Credentials,
    packages: Vec<String>,
    flags: UpgradeFlags,
    timeout: Option<Duration>,
    sse: bool,
) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    let (events, task) = service
        .upgrade_streaming(credentials, packages, flags, cancel.clone())
        .await?;

    let watcher = tokio::spawn(cancel_on_interrupt(cancel.clone(), timeout));

    let mut sink: Box<dyn EventSink> = if sse {
        Box::new(SseSink::new(tokio::io::stdout()))
    } else {
        Box::new(TextSink::new(tokio::io::stdout(), tokio::io::stderr()))
    };
    let relayed = relay.relay(events, sink.as_mut(), &cancel).await;
    watcher.abort();

    let outcome = task.await.context("upgrade task failed")?;
    info!(outcome = ?outcome, "Streaming upgrade finished");

    let summary = relayed?;
    match outcome {
        StreamOutcome::Completed if summary.succeeded() => Ok(ExitCode::SUCCESS),
        _ => Ok(ExitCode::FAILURE),
    }
}

/// Cancel on Ctrl-C or once `timeout` elapses
async fn cancel_on_interrupt(cancel: CancellationToken, timeout: Option<Duration>) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => warn!("Interrupted, closing session"),
        _ = sleep_for(timeout) => warn!("Timed out, closing session"),
        _ = cancel.cancelled() => return,
    }
    cancel.cancel();
}

async fn sleep_for(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

/// Run `operation` unless Ctrl-C or the timeout comes first. Abandoning the
/// future drops its session, which closes it.
async fn interruptible<F: Future>(operation: F, timeout: Option<Duration>) -> Result<F::Output> {
    tokio::select! {
        output = operation => Ok(output),
        _ = tokio::signal::ctrl_c() => bail!("interrupted"),
        _ = sleep_for(timeout) => {
            bail!("timed out after {}s", timeout.unwrap_or_default().as_secs())
        }
    }
}

fn print_json(response: &Response) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}

//! End-to-end streaming upgrade: scripted device -> runner -> relay -> SSE
//! client over an in-memory pipe

use pretty_assertions::assert_eq;
use routerpkg::credentials::Credentials;
use routerpkg::domain::command::{CommandRunner, ExecutionEvent, StreamOutcome};
use routerpkg::domain::opkg::{OpkgCommands, UpgradeFlags};
use routerpkg::error::{ConnectFailure, RelayResult, RouterPkgError, SessionError};
use routerpkg::infrastructure::ssh::{ScriptStep, ScriptedConnector};
use routerpkg::relay::{
    EventRelay, RelaySummary, SseDecoder, SseSink, StreamConsumer, WireEvent, WireEventKind,
};
use routerpkg::PackageService;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn creds() -> Credentials {
    Credentials::with_password("192.168.1.1", "root", "admin")
}

fn service(connector: ScriptedConnector) -> PackageService<ScriptedConnector> {
    PackageService::new(connector, CommandRunner::default(), OpkgCommands::default())
}

/// Relay `events` to an SSE client on the other end of a pipe; returns what
/// the client saw and how its stream ended
async fn relay_to_client(
    events: mpsc::Receiver<ExecutionEvent>,
    cancel: &CancellationToken,
) -> (RelaySummary, Vec<WireEvent>, RelayResult<WireEvent>) {
    let (server, client) = tokio::io::duplex(256);
    let consumer = tokio::spawn(async move {
        let mut seen = Vec::new();
        let terminal = StreamConsumer::new()
            .consume(client, |event| seen.push(event.clone()))
            .await;
        (seen, terminal)
    });

    let mut sink = SseSink::new(server);
    let summary = EventRelay::new().relay(events, &mut sink, cancel).await.unwrap();
    drop(sink);

    let (seen, terminal) = consumer.await.unwrap();
    (summary, seen, terminal)
}

#[tokio::test]
async fn test_streaming_upgrade_reaches_client_in_order() {
    let connector = ScriptedConnector::new().on(
        "opkg upgrade luci-base",
        vec![
            ScriptStep::stdout("Upgrading luci-base on root from 1.0 to 1.1...\n"),
            ScriptStep::Pause(Duration::from_millis(5)),
            ScriptStep::stdout("Configuring luci-base.\n"),
            ScriptStep::stderr("Not deleting modified conffile /etc/config/luci.\n"),
            ScriptStep::Exit(0),
        ],
    );
    let stats = connector.stats();
    let service = service(connector);
    let cancel = CancellationToken::new();

    let (events, task) = service
        .upgrade_streaming(
            &creds(),
            vec!["luci-base".into()],
            UpgradeFlags::default(),
            cancel.clone(),
        )
        .await
        .unwrap();
    let (summary, seen, terminal) = relay_to_client(events, &cancel).await;

    assert!(summary.succeeded());
    assert_eq!(summary.data_events, 3);
    assert_eq!(terminal.unwrap(), WireEvent::done());
    assert_eq!(
        seen,
        vec![
            WireEvent::new(
                WireEventKind::Stdout,
                "Upgrading luci-base on root from 1.0 to 1.1...\n",
            ),
            WireEvent::new(WireEventKind::Stdout, "Configuring luci-base.\n"),
            WireEvent::new(
                WireEventKind::Stderr,
                "Not deleting modified conffile /etc/config/luci.\n",
            ),
            WireEvent::done(),
        ]
    );

    assert_eq!(task.await.unwrap(), StreamOutcome::Completed);
    assert_eq!(stats.closes(), 1);
    assert_eq!(stats.double_closes(), 0);
}

#[tokio::test]
async fn test_failed_upgrade_keeps_partial_output() {
    let connector = ScriptedConnector::new().on(
        "opkg upgrade --force-overwrite dnsmasq",
        vec![
            ScriptStep::stdout("Upgrading dnsmasq on root from 2.89-1 to 2.90-2...\n"),
            ScriptStep::stderr(concat!(
                "Collected errors:\n",
                " * check_data_file_clashes: Package dnsmasq wants to install file\n",
            )),
            ScriptStep::Exit(255),
        ],
    );
    let stats = connector.stats();
    let service = service(connector);
    let cancel = CancellationToken::new();
    let flags = UpgradeFlags {
        force_overwrite: true,
        install_translations: false,
    };

    let (events, task) = service
        .upgrade_streaming(&creds(), vec!["dnsmasq".into()], flags, cancel.clone())
        .await
        .unwrap();
    let (summary, seen, terminal) = relay_to_client(events, &cancel).await;

    assert!(!summary.succeeded());
    assert_eq!(terminal.unwrap(), WireEvent::error("Process exited with code 255"));
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].kind, WireEventKind::Stdout);
    assert!(seen[1].payload.contains("Collected errors"));

    assert!(matches!(task.await.unwrap(), StreamOutcome::Failed(_)));
    assert_eq!(stats.open_transports(), 0);
}

#[tokio::test]
async fn test_client_disconnect_closes_session() {
    let connector = ScriptedConnector::new().on(
        "opkg upgrade kmod-ath10k",
        vec![ScriptStep::stdout("Downloading kmod-ath10k\n"), ScriptStep::Hang],
    );
    let stats = connector.stats();
    let service = service(connector);
    let cancel = CancellationToken::new();

    let (events, task) = service
        .upgrade_streaming(
            &creds(),
            vec!["kmod-ath10k".into()],
            UpgradeFlags::default(),
            cancel.clone(),
        )
        .await
        .unwrap();

    let (server, mut client) = tokio::io::duplex(256);
    let reader = tokio::spawn(async move {
        let mut decoder = SseDecoder::new();
        let mut buf = [0u8; 64];
        loop {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0, "stream closed before the first event");
            if !decoder.feed(&buf[..n]).unwrap().is_empty() {
                return;
            }
        }
    });

    let relay = EventRelay::new().with_keepalive(Some(Duration::from_millis(20)));
    let mut sink = SseSink::new(server);
    let relayed = tokio::time::timeout(
        Duration::from_secs(5),
        relay.relay(events, &mut sink, &cancel),
    )
    .await
    .expect("relay should notice the client leaving");
    reader.await.unwrap();

    assert!(relayed.is_err());
    assert!(cancel.is_cancelled());
    assert_eq!(task.await.unwrap(), StreamOutcome::Cancelled);
    assert_eq!(stats.closes(), 1);
    assert_eq!(stats.open_transports(), 0);
}

#[tokio::test]
async fn test_rejected_credentials_produce_no_stream() {
    let connector = ScriptedConnector::new()
        .refuse(ConnectFailure::AuthenticationRejected, "password rejected");
    let stats = connector.stats();
    let service = service(connector);

    let err = service
        .upgrade_streaming(
            &creds(),
            vec!["luci".into()],
            UpgradeFlags::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        RouterPkgError::Session(e) => {
            assert_eq!(e.connect_failure(), Some(ConnectFailure::AuthenticationRejected));
            assert!(matches!(e, SessionError::Connect { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(stats.commands().is_empty());
}

#[tokio::test]
async fn test_concurrent_requests_use_separate_sessions() {
    let connector = ScriptedConnector::new()
        .on(
            "opkg list-installed",
            vec![ScriptStep::stdout("busybox - 1.36.1-1\n"), ScriptStep::Exit(0)],
        )
        .on(
            "opkg info busybox",
            vec![ScriptStep::stdout("Package: busybox\nVersion: 1.36.1-1\n"), ScriptStep::Exit(0)],
        )
        .on("opkg upgrade busybox", vec![ScriptStep::stdout("ok\n"), ScriptStep::Exit(0)]);
    let stats = connector.stats();
    let service = service(connector);
    let credentials = creds();
    let packages = vec!["busybox".to_string()];

    let (installed, details, upgraded) = tokio::join!(
        service.list_installed(&credentials),
        service.package_details(&credentials, &packages),
        service.upgrade(&credentials, &packages, UpgradeFlags::default()),
    );

    assert_eq!(installed.unwrap().len(), 1);
    assert_eq!(details.unwrap()[0].version.as_deref(), Some("1.36.1-1"));
    assert_eq!(upgraded.unwrap(), "ok\n");
    assert_eq!(stats.connects(), 3);
    assert_eq!(stats.closes(), 3);
}

//! Property tests: terminal-event ordering and parser purity

use proptest::prelude::*;
use routerpkg::credentials::Credentials;
use routerpkg::domain::command::{CommandRunner, ExecutionEvent};
use routerpkg::domain::opkg::{parse_details, parse_installed, parse_upgradable};
use routerpkg::domain::session::SessionManager;
use routerpkg::infrastructure::ssh::{ScriptStep, ScriptedConnector};
use routerpkg::relay::{WireEventKind, WireTranslator};
use tokio_util::sync::CancellationToken;

const COMMAND: &str = "opkg upgrade pkg";
const INSTALLED_LINE: &str = "[a-z][a-z0-9+._]{0,12}( - [0-9][0-9.]{0,6}( - [a-z ]{0,16})?)?";

fn chunk_strategy() -> impl Strategy<Value = (bool, String)> {
    (any::<bool>(), "[a-zA-Z0-9 .:\\n-]{1,24}")
}

fn stream(chunks: Vec<(bool, String)>, exit: u32) -> Vec<ExecutionEvent> {
    let mut steps: Vec<ScriptStep> = chunks
        .into_iter()
        .map(|(is_stderr, text)| {
            if is_stderr {
                ScriptStep::stderr(text)
            } else {
                ScriptStep::stdout(text)
            }
        })
        .collect();
    steps.push(ScriptStep::Exit(exit));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async move {
        let connector = ScriptedConnector::new().on(COMMAND, steps);
        let stats = connector.stats();
        let manager = SessionManager::new(connector);
        let session = manager
            .open(&Credentials::with_password("router", "root", "pw"))
            .await
            .unwrap();

        let (mut rx, handle) = CommandRunner::default().spawn_streaming(
            session,
            COMMAND.to_string(),
            CancellationToken::new(),
        );
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        handle.await.unwrap();
        assert_eq!(stats.closes(), 1);
        assert_eq!(stats.double_closes(), 0);
        events
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_terminal_event_is_last(
        chunks in prop::collection::vec(chunk_strategy(), 0..16),
        exit in 0u32..3,
    ) {
        let n = chunks.len();
        let events = stream(chunks, exit);

        prop_assert_eq!(events.len(), n + 1);
        prop_assert!(events[n].is_terminal());
        prop_assert!(events[..n].iter().all(|e| !e.is_terminal()));
        prop_assert_eq!(matches!(events[n], ExecutionEvent::Completed), exit == 0);
    }

    #[test]
    fn prop_wire_sequence_mirrors_execution(
        chunks in prop::collection::vec(chunk_strategy(), 0..16),
    ) {
        let n = chunks.len();
        let events = stream(chunks.clone(), 0);

        let mut translator = WireTranslator::default();
        let wire: Vec<_> = events.into_iter().flat_map(|e| translator.translate(e)).collect();

        prop_assert_eq!(wire.len(), n + 1);
        prop_assert_eq!(wire[n].kind, WireEventKind::Done);
        for ((is_stderr, text), event) in chunks.iter().zip(&wire) {
            let kind = if *is_stderr { WireEventKind::Stderr } else { WireEventKind::Stdout };
            prop_assert_eq!(event.kind, kind);
            prop_assert_eq!(&event.payload, text);
        }
    }

    #[test]
    fn prop_installed_one_record_per_line(
        lines in prop::collection::vec(INSTALLED_LINE, 0..20),
    ) {
        let text = lines.join("\n");
        let records = parse_installed(&text);

        prop_assert_eq!(records.len(), lines.len());
        for (line, record) in lines.iter().zip(&records) {
            prop_assert!(line.starts_with(&record.name));
        }
    }

    #[test]
    fn prop_parsers_are_pure(text in "(?s).{0,400}") {
        prop_assert_eq!(parse_installed(&text), parse_installed(&text));
        prop_assert_eq!(parse_upgradable(&text), parse_upgradable(&text));
        prop_assert_eq!(parse_details(&text), parse_details(&text));
    }

    #[test]
    fn prop_upgradable_needs_three_fields(
        name in "[a-z][a-z0-9-]{0,10}",
        current in "[0-9][0-9.]{0,5}",
        new in "[0-9][0-9.]{0,5}",
    ) {
        let text = format!("{name} - {current} - {new} - extra\n{name} - {current}\n");
        let records = parse_upgradable(&text);

        prop_assert_eq!(records.len(), 1);
        prop_assert_eq!(&records[0].name, &name);
        prop_assert_eq!(&records[0].current_version, &current);
        prop_assert_eq!(&records[0].new_version, &new);
    }
}

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::discovery::ConsumerId;
use crate::discovery::DiscoveryEvent;
use crate::discovery::DiscoveryEventKind;
use crate::import::ImportReconciler;
use crate::test_utils::calculator_type;
use crate::test_utils::greeter;
use crate::test_utils::greeter_type;
use crate::test_utils::wait_until;
use crate::test_utils::Behavior;
use crate::test_utils::ImportLedger;
use crate::test_utils::RecordingProvider;
use crate::CapabilityType;
use crate::ImportConfig;

fn sourced(
    consumer: &str,
    kind: DiscoveryEventKind,
    capability_type: CapabilityType,
    key: &str,
) -> SourcedEvent {
    SourcedEvent {
        consumer: ConsumerId::new(consumer),
        event: DiscoveryEvent {
            capability_type,
            kind,
            endpoint: greeter(key),
        },
    }
}

#[tokio::test]
async fn test_endpoint_reported_by_several_sources_is_imported_once() {
    let ledger = ImportLedger::new();
    let reconciler = ImportReconciler::new(&ImportConfig::default());
    let provider = Arc::new(RecordingProvider::new("rsa", Behavior::Accept, ledger.clone()));
    reconciler.on_provider_added(provider.registration());

    let (_tx, rx) = mpsc::unbounded_channel();
    let mut pump = ImportPump::new(reconciler.clone(), rx, CancellationToken::new());

    pump.forward(sourced("c1", DiscoveryEventKind::Appeared, greeter_type(), "g1")).await;
    pump.forward(sourced("c1", DiscoveryEventKind::Appeared, calculator_type(), "g1")).await;
    pump.forward(sourced("c2", DiscoveryEventKind::Appeared, greeter_type(), "g1")).await;
    reconciler.wait_idle().await;
    assert_eq!(ledger.attempts_by("rsa"), 1);

    pump.forward(sourced("c1", DiscoveryEventKind::Disappeared, greeter_type(), "g1")).await;
    pump.forward(sourced("c1", DiscoveryEventKind::Disappeared, calculator_type(), "g1")).await;
    assert!(reconciler.import_record(&greeter("g1")).is_some());

    pump.forward(sourced("c2", DiscoveryEventKind::Disappeared, greeter_type(), "g1")).await;
    assert!(reconciler.import_record(&greeter("g1")).is_none());
    assert_eq!(ledger.open_count("g1"), 0);

    // unknown disappearance is ignored
    pump.forward(sourced("c1", DiscoveryEventKind::Disappeared, greeter_type(), "g9")).await;
}

#[tokio::test]
async fn test_run_forwards_until_cancelled() {
    let reconciler = ImportReconciler::new(&ImportConfig::default());
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(ImportPump::new(reconciler.clone(), rx, cancel.clone()).run());

    tx.send(sourced("c1", DiscoveryEventKind::Appeared, greeter_type(), "g1")).unwrap();
    wait_until(|| reconciler.known_endpoints().contains(&greeter("g1"))).await;

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_relay_delivers_to_consumer_before_import_feed() {
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let (sink, mut consumer_rx) = mpsc::unbounded_channel();
    let (feed_tx, mut feed_rx) = mpsc::unbounded_channel();
    let relay = ConsumerRelay::new(ConsumerId::new("c1"), inbox_rx, sink, feed_tx, CancellationToken::new());
    let handle = tokio::spawn(relay.run());

    let event = DiscoveryEvent {
        capability_type: greeter_type(),
        kind: DiscoveryEventKind::Appeared,
        endpoint: greeter("g1"),
    };
    inbox_tx.send(event.clone()).unwrap();

    let forwarded = feed_rx.recv().await.unwrap();
    // the consumer copy was sent first
    assert_eq!(consumer_rx.try_recv().unwrap(), event);
    assert_eq!(forwarded.consumer, ConsumerId::new("c1"));
    assert_eq!(forwarded.event, event);

    drop(inbox_tx);
    handle.await.unwrap();
}

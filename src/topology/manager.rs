use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::ConsumerRelay;
use super::ImportFeed;
use super::ImportPump;
use super::RegistryEvent;
use crate::discovery::ConsumerId;
use crate::discovery::DiscoveryEvent;
use crate::discovery::DiscoveryEventKind;
use crate::discovery::DiscoverySender;
use crate::discovery::RetiredWatch;
use crate::discovery::WatchManager;
use crate::import::ImportReconciler;
use crate::CapabilityType;
use crate::CoordinationStore;
use crate::TopologyConfig;

/// Applies registry events to discovery and import reconciliation.
pub struct TopologyManager<S: CoordinationStore> {
    watches: WatchManager<S>,
    reconciler: ImportReconciler,
    /// Relay inbox per registered consumer; guards every consumer change
    relays: Mutex<HashMap<ConsumerId, DiscoverySender>>,
    import_feed: ImportFeed,
    pump: Mutex<Option<ImportPump>>,
    cancel: CancellationToken,
}

impl<S: CoordinationStore> TopologyManager<S> {
    pub fn new(
        store: Arc<S>,
        config: &TopologyConfig,
    ) -> Self {
        let reconciler = ImportReconciler::new(&config.import);
        let (import_feed, feed) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let pump = ImportPump::new(reconciler.clone(), feed, cancel.child_token());

        Self {
            watches: WatchManager::new(store, config),
            reconciler,
            relays: Mutex::new(HashMap::new()),
            import_feed,
            pump: Mutex::new(Some(pump)),
            cancel,
        }
    }

    /// Starts forwarding discovered endpoints to the reconciler.
    ///
    /// Must be called within a tokio runtime. Idempotent.
    pub fn start(&self) {
        if let Some(pump) = self.pump.lock().take() {
            tokio::spawn(pump.run());
            debug!("import pump started");
        }
    }

    /// Applies one registry event.
    ///
    /// Consumer events must be handled within a tokio runtime.
    pub async fn handle(
        &self,
        event: RegistryEvent,
    ) {
        match event {
            RegistryEvent::ConsumerAdded {
                consumer,
                capability_types,
                sink,
            } => self.add_consumer(consumer, capability_types, sink),
            RegistryEvent::ConsumerModified {
                consumer,
                capability_types,
            } => {
                let relays = self.relays.lock();
                let Some(relay) = relays.get(&consumer) else {
                    warn!(%consumer, "modification for unknown consumer ignored");
                    return;
                };
                let retired = self.watches.on_consumer_modified(&consumer, capability_types);
                retract(relay, retired);
            }
            RegistryEvent::ConsumerRemoved { consumer } => {
                let mut relays = self.relays.lock();
                let retired = self.watches.on_consumer_removed(&consumer);
                // dropping the last inbox sender lets the relay drain and exit
                if let Some(relay) = relays.remove(&consumer) {
                    retract(&relay, retired);
                }
            }
            RegistryEvent::ProviderAdded(registration) => {
                self.reconciler.on_provider_added(registration);
            }
            RegistryEvent::ProviderRemoved(id) => {
                self.reconciler.on_provider_removed(&id).await;
            }
        }
    }

    /// Processes registry events until the channel closes or a shutdown
    /// signal arrives, then shuts down.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<RegistryEvent>,
        mut shutdown_signal: watch::Receiver<()>,
    ) {
        self.start();
        info!("topology manager running");

        loop {
            tokio::select! {
                biased;
                _ = shutdown_signal.changed() => {
                    warn!("shutdown signal received.");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => {
                        info!("registry event channel closed");
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Stops every monitor and closes every import.
    pub async fn shutdown(&self) {
        self.relays.lock().clear();
        self.watches.shutdown();
        self.cancel.cancel();
        self.reconciler.shutdown().await;
        info!("topology manager stopped");
    }

    pub fn watch_manager(&self) -> &WatchManager<S> {
        &self.watches
    }

    pub fn reconciler(&self) -> &ImportReconciler {
        &self.reconciler
    }

    /// Union of the capability types of all registered consumers.
    pub fn import_interest(&self) -> BTreeSet<CapabilityType> {
        self.relays
            .lock()
            .keys()
            .flat_map(|consumer| self.watches.monitored_types(consumer))
            .collect()
    }

    fn add_consumer(
        &self,
        consumer: ConsumerId,
        capability_types: BTreeSet<CapabilityType>,
        sink: DiscoverySender,
    ) {
        let mut relays = self.relays.lock();
        let inbox = match relays.get(&consumer) {
            Some(inbox) => inbox.clone(),
            None => {
                let (inbox, rx) = mpsc::unbounded_channel();
                let relay = ConsumerRelay::new(
                    consumer.clone(),
                    rx,
                    sink,
                    self.import_feed.clone(),
                    self.cancel.child_token(),
                );
                tokio::spawn(relay.run());
                relays.insert(consumer.clone(), inbox.clone());
                inbox
            }
        };
        self.watches.on_consumer_added(consumer, capability_types, inbox);
    }
}

/// Reports the endpoints of retired watches as gone, behind every event the
/// stopped monitors already delivered.
fn retract(
    relay: &DiscoverySender,
    retired: Vec<RetiredWatch>,
) {
    for watch in retired {
        debug!(capability_type = %watch.capability_type, endpoints = watch.last_known.len(), "retracting retired watch");
        for endpoint in watch.last_known {
            let _ = relay.send(DiscoveryEvent {
                capability_type: watch.capability_type.clone(),
                kind: DiscoveryEventKind::Disappeared,
                endpoint,
            });
        }
    }
}

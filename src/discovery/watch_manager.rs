use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::ConsumerId;
use super::DiscoverySender;
use super::InterfaceMonitor;
use super::MonitorState;
use crate::BackoffPolicy;
use crate::CapabilityType;
use crate::CoordinationStore;
use crate::EndpointDescriptor;
use crate::StorePath;
use crate::TopologyConfig;

/// A monitor that was stopped because its consumer lost interest.
///
/// Carries the endpoints the monitor had reported as present when it stopped,
/// so callers mirroring discovery state can retract them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetiredWatch {
    pub capability_type: CapabilityType,
    pub last_known: BTreeSet<EndpointDescriptor>,
}

struct ConsumerWatches<S: CoordinationStore> {
    sink: DiscoverySender,
    monitors: BTreeMap<CapabilityType, InterfaceMonitor<S>>,
}

/// Keeps the set of running monitors equal to the declared interest of the
/// registered consumers: exactly one monitor per (consumer, capability type).
pub struct WatchManager<S: CoordinationStore> {
    store: Arc<S>,
    root_path: String,
    policy: BackoffPolicy,
    consumers: DashMap<ConsumerId, ConsumerWatches<S>>,
}

impl<S: CoordinationStore> WatchManager<S> {
    pub fn new(
        store: Arc<S>,
        config: &TopologyConfig,
    ) -> Self {
        Self {
            store,
            root_path: config.watch.root_path.clone(),
            policy: config.retry.store_watch,
            consumers: DashMap::new(),
        }
    }

    /// Registers `consumer` and starts one monitor per capability type.
    ///
    /// Adding a consumer that is already registered unions the new types into
    /// its interest; events keep flowing to the sink it was first added with.
    pub fn on_consumer_added(
        &self,
        consumer: ConsumerId,
        capability_types: impl IntoIterator<Item = CapabilityType>,
        sink: DiscoverySender,
    ) {
        let mut entry = self.consumers.entry(consumer.clone()).or_insert_with(|| {
            info!(%consumer, "consumer registered");
            ConsumerWatches {
                sink,
                monitors: BTreeMap::new(),
            }
        });

        let watches = entry.value_mut();
        for capability_type in capability_types {
            if watches.monitors.contains_key(&capability_type) {
                debug!(%consumer, %capability_type, "already monitored");
                continue;
            }
            let monitor = self.spawn_monitor(&consumer, capability_type.clone(), watches.sink.clone());
            watches.monitors.insert(capability_type, monitor);
        }
    }

    /// Replaces the interest of `consumer` with `capability_types`.
    ///
    /// Monitors for types no longer listed are stopped, monitors for new types
    /// are started and monitors in the intersection are left untouched.
    /// Unknown consumers are ignored.
    pub fn on_consumer_modified(
        &self,
        consumer: &ConsumerId,
        capability_types: impl IntoIterator<Item = CapabilityType>,
    ) -> Vec<RetiredWatch> {
        let Some(mut watches) = self.consumers.get_mut(consumer) else {
            warn!(%consumer, "modification for unknown consumer ignored");
            return Vec::new();
        };

        let wanted: BTreeSet<CapabilityType> = capability_types.into_iter().collect();
        let removed: Vec<CapabilityType> =
            watches.monitors.keys().filter(|ty| !wanted.contains(*ty)).cloned().collect();

        let mut retired = Vec::with_capacity(removed.len());
        for capability_type in removed {
            if let Some(monitor) = watches.monitors.remove(&capability_type) {
                retired.push(retire(monitor));
            }
        }

        for capability_type in wanted {
            if watches.monitors.contains_key(&capability_type) {
                continue;
            }
            let monitor = self.spawn_monitor(consumer, capability_type.clone(), watches.sink.clone());
            watches.monitors.insert(capability_type, monitor);
        }

        debug!(%consumer, retired = retired.len(), monitors = watches.monitors.len(), "consumer modified");
        retired
    }

    /// Stops every monitor of `consumer` and forgets it.
    pub fn on_consumer_removed(
        &self,
        consumer: &ConsumerId,
    ) -> Vec<RetiredWatch> {
        let Some((_, watches)) = self.consumers.remove(consumer) else {
            debug!(%consumer, "removal of unknown consumer ignored");
            return Vec::new();
        };

        info!(%consumer, monitors = watches.monitors.len(), "consumer removed");
        watches.monitors.into_values().map(retire).collect()
    }

    /// Stops all monitors and drops all consumers.
    pub fn shutdown(&self) {
        let consumers: Vec<ConsumerId> = self.consumers.iter().map(|e| e.key().clone()).collect();
        for consumer in consumers {
            self.on_consumer_removed(&consumer);
        }
    }

    pub fn is_registered(
        &self,
        consumer: &ConsumerId,
    ) -> bool {
        self.consumers.contains_key(consumer)
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Total number of running monitors across all consumers.
    pub fn monitor_count(&self) -> usize {
        self.consumers.iter().map(|e| e.monitors.len()).sum()
    }

    pub fn monitored_types(
        &self,
        consumer: &ConsumerId,
    ) -> BTreeSet<CapabilityType> {
        self.consumers
            .get(consumer)
            .map(|watches| watches.monitors.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// State of the monitor `consumer` holds for `capability_type`.
    ///
    /// A monitor whose finite retry budget ran out stays `Unarmed` and is
    /// not restarted; the watch has to be cancelled and requested again.
    pub fn monitor_state(
        &self,
        consumer: &ConsumerId,
        capability_type: &CapabilityType,
    ) -> Option<MonitorState> {
        self.consumers
            .get(consumer)
            .and_then(|watches| watches.monitors.get(capability_type).map(|m| m.state()))
    }

    pub fn known_endpoints(
        &self,
        consumer: &ConsumerId,
        capability_type: &CapabilityType,
    ) -> BTreeSet<EndpointDescriptor> {
        self.consumers
            .get(consumer)
            .and_then(|watches| watches.monitors.get(capability_type).map(|m| m.known_endpoints()))
            .unwrap_or_default()
    }

    fn spawn_monitor(
        &self,
        consumer: &ConsumerId,
        capability_type: CapabilityType,
        sink: DiscoverySender,
    ) -> InterfaceMonitor<S> {
        let path = StorePath::for_capability(&self.root_path, &capability_type);
        let monitor = InterfaceMonitor::new(
            self.store.clone(),
            consumer.clone(),
            capability_type,
            path,
            sink,
            self.policy,
        );
        monitor.start();
        monitor
    }
}

fn retire<S: CoordinationStore>(monitor: InterfaceMonitor<S>) -> RetiredWatch {
    monitor.stop();
    RetiredWatch {
        capability_type: monitor.capability_type().clone(),
        last_known: monitor.known_endpoints(),
    }
}

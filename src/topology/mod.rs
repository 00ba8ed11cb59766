//! Wiring of discovery and import reconciliation behind one registry-facing
//! entry point.
//!
//! ```text
//! RegistryEvent ──► TopologyManager ──► WatchManager ──► monitors of consumer C
//!                                                            │
//!                                                            ▼
//!                                                   ConsumerRelay(C) ──► C's channel
//!                                                            │
//!                                                            ▼
//!                                                       ImportPump ──► ImportReconciler
//! ```
//!
//! Every discovery event reaches its consumer before the reconciler acts on
//! it, so a consumer always hears about a disappearance before the matching
//! import is closed. Import interest is the union of all consumers' interest;
//! the pump counts, per endpoint, the (consumer, capability type) pairs
//! currently reporting it.

mod manager;
mod pump;
mod relay;

pub use manager::*;
pub(crate) use pump::*;
pub(crate) use relay::*;

#[cfg(test)]
mod pump_test;

use std::collections::BTreeSet;

use crate::discovery::ConsumerId;
use crate::discovery::DiscoverySender;
use crate::import::ProviderId;
use crate::import::ProviderRegistration;
use crate::CapabilityType;

/// Change announced by the local service registry.
#[derive(Debug)]
pub enum RegistryEvent {
    ConsumerAdded {
        consumer: ConsumerId,
        capability_types: BTreeSet<CapabilityType>,
        sink: DiscoverySender,
    },
    ConsumerModified {
        consumer: ConsumerId,
        capability_types: BTreeSet<CapabilityType>,
    },
    ConsumerRemoved {
        consumer: ConsumerId,
    },
    ProviderAdded(ProviderRegistration),
    ProviderRemoved(ProviderId),
}

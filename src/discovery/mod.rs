//! Discovery of remote endpoints through store watches.
//!
//! # Architecture
//!
//! ```text
//! registry ──► WatchManager ──► one InterfaceMonitor per (consumer, capability type)
//!                                   │ watch_exists / list_children
//!                                   ▼
//!                             CoordinationStore
//!                                   │ one-shot fire
//!                                   ▼
//!                 re-arm ─► list ─► diff ─► Disappeared*, Appeared* ─► consumer channel
//! ```
//!
//! Each monitor runs its own watch cycle task, so a slow or unreachable path
//! never delays the others. Events of one monitor are delivered in the order
//! their diffs were computed; across monitors there is no ordering.

mod monitor;
mod watch_manager;

pub use monitor::*;
pub use watch_manager::*;


use std::fmt;

use tokio::sync::mpsc;

use crate::CapabilityType;
use crate::EndpointDescriptor;

/// Identity of a local consumer interested in capability types.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConsumerId(String);

impl ConsumerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConsumerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryEventKind {
    Appeared,
    Disappeared,
}

/// Notification delivered to consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEvent {
    pub capability_type: CapabilityType,
    pub kind: DiscoveryEventKind,
    pub endpoint: EndpointDescriptor,
}

/// Channel a consumer receives its discovery notifications on.
pub type DiscoverySender = mpsc::UnboundedSender<DiscoveryEvent>;

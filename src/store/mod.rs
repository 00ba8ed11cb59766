//! Coordination store contract.
//!
//! The store is a hierarchy of nodes; every capability type owns one node
//! whose children are the endpoints published for it. Watches are one-shot:
//! a registration fires at most once and has to be re-armed to observe later
//! changes. Several changes that happen before re-arming may be coalesced into
//! one firing, so observers must re-read the children instead of patching
//! their view incrementally.

mod memory;

pub use memory::*;


use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::oneshot;

use crate::Result;
use crate::StorePath;

/// One child of a watched node, as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Child name, unique under its parent
    pub key: String,
    /// Encoded endpoint properties
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchedEventKind {
    NodeCreated,
    NodeDeleted,
    DataChanged,
    ChildrenChanged,
}

/// Delivered through the `on_fire` channel of a watch registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub path: StorePath,
    pub kind: WatchedEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchToken(pub u64);

/// Result of arming a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchRegistration {
    /// Whether the node existed when the watch was armed
    pub exists: bool,
    /// Handle for `cancel_watch`
    pub token: WatchToken,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Arms a one-shot watch on `path` covering creation, deletion, data and
    /// children changes of that node.
    ///
    /// # Errors
    /// `StoreError::Unavailable` when the store cannot be reached.
    async fn watch_exists(
        &self,
        path: &StorePath,
        on_fire: oneshot::Sender<WatchedEvent>,
    ) -> Result<WatchRegistration>;

    /// Best-effort removal of a pending watch. Unknown tokens are ignored.
    fn cancel_watch(
        &self,
        path: &StorePath,
        token: WatchToken,
    );

    /// Current children of `path`. A missing node has no children.
    async fn list_children(
        &self,
        path: &StorePath,
    ) -> Result<Vec<RawEntry>>;
}

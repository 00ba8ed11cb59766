//! In-process coordination store.
//!
//! Honours the one-shot watch contract of [`CoordinationStore`]: every change
//! to a node fires and drains the watches pending on it. Useful for embedded
//! deployments where publishers and consumers share a process, and for tests.

use std::collections::BTreeMap;
use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

use super::CoordinationStore;
use super::RawEntry;
use super::WatchRegistration;
use super::WatchToken;
use super::WatchedEvent;
use super::WatchedEventKind;
use crate::EndpointDescriptor;
use crate::Result;
use crate::StoreError;
use crate::StorePath;

#[derive(Default)]
struct MemoryStoreInner {
    /// Node path -> children (key -> data)
    nodes: BTreeMap<StorePath, BTreeMap<String, Vec<u8>>>,
    watches: HashMap<StorePath, Vec<(WatchToken, oneshot::Sender<WatchedEvent>)>>,
    next_token: u64,
    /// Total number of watches ever armed
    armed_total: u64,
    unavailable: bool,
}

impl MemoryStoreInner {
    fn fire(
        &mut self,
        path: &StorePath,
        kind: WatchedEventKind,
    ) {
        if let Some(pending) = self.watches.remove(path) {
            trace!(%path, ?kind, watches = pending.len(), "firing watches");
            for (_, on_fire) in pending {
                let _ = on_fire.send(WatchedEvent {
                    path: path.clone(),
                    kind,
                });
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryStore")
            .field("nodes", &inner.nodes.len())
            .field("unavailable", &inner.unavailable)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_node(
        &self,
        path: &StorePath,
    ) {
        let mut inner = self.inner.lock();
        if !inner.nodes.contains_key(path) {
            inner.nodes.insert(path.clone(), BTreeMap::new());
            inner.fire(path, WatchedEventKind::NodeCreated);
        }
    }

    pub fn delete_node(
        &self,
        path: &StorePath,
    ) {
        let mut inner = self.inner.lock();
        if inner.nodes.remove(path).is_some() {
            inner.fire(path, WatchedEventKind::NodeDeleted);
        }
    }

    /// Adds or replaces a child, creating the parent node when missing.
    pub fn put_child(
        &self,
        path: &StorePath,
        key: impl Into<String>,
        data: Vec<u8>,
    ) {
        let mut inner = self.inner.lock();
        let children = inner.nodes.entry(path.clone()).or_default();
        let kind = match children.insert(key.into(), data) {
            Some(_) => WatchedEventKind::DataChanged,
            None => WatchedEventKind::ChildrenChanged,
        };
        inner.fire(path, kind);
    }

    /// Publishes `endpoint` as a child of `path`.
    pub fn publish(
        &self,
        path: &StorePath,
        endpoint: &EndpointDescriptor,
    ) -> Result<()> {
        let entry = endpoint.to_raw_entry()?;
        self.put_child(path, entry.key, entry.data);
        Ok(())
    }

    pub fn remove_child(
        &self,
        path: &StorePath,
        key: &str,
    ) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner
            .nodes
            .get_mut(path)
            .map(|children| children.remove(key).is_some())
            .unwrap_or(false);
        if removed {
            inner.fire(path, WatchedEventKind::ChildrenChanged);
        }
        removed
    }

    /// Simulates losing (`false`) or regaining (`true`) the store connection.
    pub fn set_available(
        &self,
        available: bool,
    ) {
        self.inner.lock().unavailable = !available;
    }

    /// Watches currently pending on `path`.
    pub fn pending_watches(
        &self,
        path: &StorePath,
    ) -> usize {
        self.inner.lock().watches.get(path).map(Vec::len).unwrap_or(0)
    }

    pub fn armed_total(&self) -> u64 {
        self.inner.lock().armed_total
    }

    pub fn children_count(
        &self,
        path: &StorePath,
    ) -> usize {
        self.inner.lock().nodes.get(path).map(BTreeMap::len).unwrap_or(0)
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn watch_exists(
        &self,
        path: &StorePath,
        on_fire: oneshot::Sender<WatchedEvent>,
    ) -> Result<WatchRegistration> {
        let mut inner = self.inner.lock();
        if inner.unavailable {
            return Err(StoreError::Unavailable("memory store offline".into()).into());
        }

        inner.next_token += 1;
        inner.armed_total += 1;
        let token = WatchToken(inner.next_token);
        inner.watches.entry(path.clone()).or_default().push((token, on_fire));

        Ok(WatchRegistration {
            exists: inner.nodes.contains_key(path),
            token,
        })
    }

    fn cancel_watch(
        &self,
        path: &StorePath,
        token: WatchToken,
    ) {
        let mut inner = self.inner.lock();
        if let Some(pending) = inner.watches.get_mut(path) {
            pending.retain(|(t, _)| *t != token);
            if pending.is_empty() {
                inner.watches.remove(path);
            }
        }
    }

    async fn list_children(
        &self,
        path: &StorePath,
    ) -> Result<Vec<RawEntry>> {
        let inner = self.inner.lock();
        if inner.unavailable {
            return Err(StoreError::Unavailable("memory store offline".into()).into());
        }

        Ok(inner
            .nodes
            .get(path)
            .map(|children| {
                children
                    .iter()
                    .map(|(key, data)| RawEntry {
                        key: key.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

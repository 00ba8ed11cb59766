//! Single capability-type watcher.
//!
//! States: `Unarmed → Armed → (Fired → Armed)* → Stopped`.
//!
//! A watch cycle arms a one-shot watch, lists the children of the path, diffs
//! them against the known endpoints and waits for the watch to fire. After a
//! fire the watch is re-armed *before* the children are read again, so a
//! change landing between the fire and the read is either part of that read or
//! fires the new watch. Nothing is ever missed, at the price of a full re-diff
//! per fire.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::ConsumerId;
use super::DiscoveryEvent;
use super::DiscoveryEventKind;
use super::DiscoverySender;
use crate::utils::async_task::task_with_timeout_and_exponential_backoff;
use crate::BackoffPolicy;
use crate::CapabilityType;
use crate::CoordinationStore;
use crate::EndpointDescriptor;
use crate::Error;
use crate::RawEntry;
use crate::Result;
use crate::StoreError;
use crate::StorePath;
use crate::WatchRegistration;
use crate::WatchToken;
use crate::WatchedEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Created, or still trying to reach the store
    Unarmed,
    /// A watch is registered and the known endpoints are current
    Armed,
    /// The watch fired; re-arming is in progress
    Fired,
    /// Terminal
    Stopped,
}

struct MonitorShared {
    state: MonitorState,
    known_endpoints: BTreeSet<EndpointDescriptor>,
    active_watch: Option<WatchToken>,
    started: bool,
}

pub struct InterfaceMonitor<S: CoordinationStore> {
    capability_type: CapabilityType,
    path: StorePath,
    consumer: ConsumerId,
    store: Arc<S>,
    sink: DiscoverySender,
    policy: BackoffPolicy,
    shared: Arc<Mutex<MonitorShared>>,
    cancel: CancellationToken,
}

impl<S: CoordinationStore> std::fmt::Debug for InterfaceMonitor<S> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("InterfaceMonitor")
            .field("capability_type", &self.capability_type)
            .field("path", &self.path)
            .field("consumer", &self.consumer)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<S: CoordinationStore> InterfaceMonitor<S> {
    pub fn new(
        store: Arc<S>,
        consumer: ConsumerId,
        capability_type: CapabilityType,
        path: StorePath,
        sink: DiscoverySender,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            capability_type,
            path,
            consumer,
            store,
            sink,
            policy,
            shared: Arc::new(Mutex::new(MonitorShared {
                state: MonitorState::Unarmed,
                known_endpoints: BTreeSet::new(),
                active_watch: None,
                started: false,
            })),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawns the watch cycle. Must be called within a tokio runtime.
    ///
    /// Calling `start()` on a started or stopped monitor is a no-op.
    pub fn start(&self) {
        {
            let mut shared = self.shared.lock();
            if shared.started || shared.state == MonitorState::Stopped {
                return;
            }
            shared.started = true;
        }

        let cycle = WatchCycle {
            store: self.store.clone(),
            capability_type: self.capability_type.clone(),
            path: self.path.clone(),
            consumer: self.consumer.clone(),
            sink: self.sink.clone(),
            policy: self.policy,
            shared: self.shared.clone(),
            cancel: self.cancel.clone(),
        };
        tokio::spawn(cycle.run());

        debug!(consumer = %self.consumer, path = %self.path, "interface monitor started");
    }

    /// Stops the monitor from any state.
    ///
    /// No event is emitted once this returns. Idempotent.
    pub fn stop(&self) {
        let watch = {
            let mut shared = self.shared.lock();
            if shared.state == MonitorState::Stopped {
                return;
            }
            shared.state = MonitorState::Stopped;
            shared.active_watch.take()
        };

        self.cancel.cancel();
        if let Some(token) = watch {
            self.store.cancel_watch(&self.path, token);
        }

        debug!(consumer = %self.consumer, path = %self.path, "interface monitor stopped");
    }

    pub fn state(&self) -> MonitorState {
        self.shared.lock().state
    }

    pub fn known_endpoints(&self) -> BTreeSet<EndpointDescriptor> {
        self.shared.lock().known_endpoints.clone()
    }

    pub fn capability_type(&self) -> &CapabilityType {
        &self.capability_type
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    pub fn consumer(&self) -> &ConsumerId {
        &self.consumer
    }
}

impl<S: CoordinationStore> Drop for InterfaceMonitor<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State moved into the spawned watch cycle task.
struct WatchCycle<S: CoordinationStore> {
    store: Arc<S>,
    capability_type: CapabilityType,
    path: StorePath,
    consumer: ConsumerId,
    sink: DiscoverySender,
    policy: BackoffPolicy,
    shared: Arc<Mutex<MonitorShared>>,
    cancel: CancellationToken,
}

impl<S: CoordinationStore> WatchCycle<S> {
    async fn run(self) {
        loop {
            let Some((registration, fired)) = self.arm_and_scan().await else {
                return;
            };

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.store.cancel_watch(&self.path, registration.token);
                    return;
                }
                result = fired => {
                    match result {
                        Ok(event) => trace!(path = %self.path, kind = ?event.kind, "watch fired"),
                        Err(_) => debug!(path = %self.path, "watch dropped by store, re-arming"),
                    }

                    let mut shared = self.shared.lock();
                    if shared.state == MonitorState::Stopped {
                        return;
                    }
                    shared.state = MonitorState::Fired;
                    shared.active_watch = None;
                }
            }
        }
    }

    /// Arms the next watch and publishes the diff of the current children.
    ///
    /// Returns `None` when the monitor was stopped or arming gave up.
    async fn arm_and_scan(&self) -> Option<(WatchRegistration, oneshot::Receiver<WatchedEvent>)> {
        let attempt =
            task_with_timeout_and_exponential_backoff(move || self.try_arm_and_scan(), self.policy);

        let result = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            result = attempt => result,
        };

        match result {
            Ok((registration, fired, entries)) => {
                if self.apply(registration, entries) {
                    Some((registration, fired))
                } else {
                    self.store.cancel_watch(&self.path, registration.token);
                    None
                }
            }
            Err(_) if self.shared.lock().state == MonitorState::Stopped => None,
            Err(e) => {
                error!(
                    consumer = %self.consumer,
                    path = %self.path,
                    "giving up arming watch: {}", e
                );
                None
            }
        }
    }

    /// One arming attempt. The watch is published as the active one as soon
    /// as it is registered, so `stop()` or the next attempt cancels it even
    /// if this future is dropped while listing.
    async fn try_arm_and_scan(
        &self
    ) -> Result<(WatchRegistration, oneshot::Receiver<WatchedEvent>, Vec<RawEntry>)> {
        let (on_fire, fired) = oneshot::channel();
        let registration = self.store.watch_exists(&self.path, on_fire).await?;
        self.publish_watch(registration.token)?;

        match self.store.list_children(&self.path).await {
            Ok(entries) => Ok((registration, fired, entries)),
            Err(Error::Store(StoreError::NoNode(_))) => Ok((registration, fired, Vec::new())),
            Err(e) => {
                self.retract_watch(registration.token);
                Err(e)
            }
        }
    }

    /// Makes `token` the active watch and cancels the one it replaces, left
    /// behind by an attempt that timed out.
    fn publish_watch(
        &self,
        token: WatchToken,
    ) -> Result<()> {
        let previous = {
            let mut shared = self.shared.lock();
            if shared.state == MonitorState::Stopped {
                None
            } else {
                Some(shared.active_watch.replace(token))
            }
        };

        match previous {
            None => {
                self.store.cancel_watch(&self.path, token);
                Err(Error::Fatal(format!("monitor for {} stopped while arming", self.path)))
            }
            Some(Some(stale)) if stale != token => {
                trace!(path = %self.path, ?stale, "cancelling watch of abandoned attempt");
                self.store.cancel_watch(&self.path, stale);
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }

    fn retract_watch(
        &self,
        token: WatchToken,
    ) {
        {
            let mut shared = self.shared.lock();
            if shared.active_watch == Some(token) {
                shared.active_watch = None;
            }
        }
        self.store.cancel_watch(&self.path, token);
    }

    /// Diffs `entries` against the known endpoints and emits the changes.
    ///
    /// Returns `false` if the monitor was stopped in the meantime.
    fn apply(
        &self,
        registration: WatchRegistration,
        entries: Vec<RawEntry>,
    ) -> bool {
        let current: BTreeSet<EndpointDescriptor> = entries
            .iter()
            .filter_map(|entry| match EndpointDescriptor::decode(entry) {
                Ok(endpoint) => Some(endpoint),
                Err(e) => {
                    warn!(path = %self.path, key = %entry.key, "skipping undecodable entry: {}", e);
                    None
                }
            })
            .collect();

        let mut shared = self.shared.lock();
        if shared.state == MonitorState::Stopped {
            return false;
        }
        shared.state = MonitorState::Armed;
        shared.active_watch = Some(registration.token);

        let disappeared: Vec<EndpointDescriptor> =
            shared.known_endpoints.difference(&current).cloned().collect();
        let appeared: Vec<EndpointDescriptor> =
            current.difference(&shared.known_endpoints).cloned().collect();

        for endpoint in disappeared {
            self.emit(DiscoveryEventKind::Disappeared, endpoint);
        }
        for endpoint in appeared {
            self.emit(DiscoveryEventKind::Appeared, endpoint);
        }

        shared.known_endpoints = current;
        true
    }

    fn emit(
        &self,
        kind: DiscoveryEventKind,
        endpoint: EndpointDescriptor,
    ) {
        trace!(consumer = %self.consumer, path = %self.path, ?kind, endpoint = %endpoint, "discovery event");
        let event = DiscoveryEvent {
            capability_type: self.capability_type.clone(),
            kind,
            endpoint,
        };
        if self.sink.send(event).is_err() {
            debug!(consumer = %self.consumer, "consumer channel closed, dropping event");
        }
    }
}

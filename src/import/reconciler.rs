//! Desired-state reconciliation of imports.
//!
//! Desired state: every known endpoint has exactly one active import, served
//! by the first available provider (in registration order) that accepts it.
//!
//! All bookkeeping lives behind one mutex. Provider attempts and handle closes
//! run outside of it; each attempt result is re-checked against the current
//! state before it is installed, and stale successes are closed.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::ImportEvent;
use super::ImportFailure;
use super::ImportOutcome;
use super::ImportRecord;
use super::ProviderId;
use super::ProviderRegistration;
use crate::EndpointDescriptor;
use crate::ImportConfig;

#[derive(Default)]
struct ReconcilerState {
    known_endpoints: BTreeSet<EndpointDescriptor>,
    /// Registration order is selection priority
    providers: Vec<ProviderRegistration>,
    active_imports: HashMap<EndpointDescriptor, Arc<ImportRecord>>,
    /// Endpoints with an attempt task running
    in_flight: HashSet<EndpointDescriptor>,
    /// Providers that already failed an endpoint since it appeared
    failed: HashMap<EndpointDescriptor, HashSet<ProviderId>>,
    /// Bumped on every endpoint appearance and provider registration
    epoch: u64,
    appeared_at: HashMap<EndpointDescriptor, u64>,
    registered_at: HashMap<ProviderId, u64>,
    shutting_down: bool,
}

impl ReconcilerState {
    fn needs_import(
        &self,
        endpoint: &EndpointDescriptor,
    ) -> bool {
        !self.shutting_down
            && self.known_endpoints.contains(endpoint)
            && !self.active_imports.contains_key(endpoint)
    }

    fn next_candidate(
        &self,
        endpoint: &EndpointDescriptor,
    ) -> Option<ProviderRegistration> {
        let failed = self.failed.get(endpoint);
        self.providers
            .iter()
            .find(|p| failed.map_or(true, |ids| !ids.contains(&p.id)))
            .cloned()
    }

    fn has_provider(
        &self,
        id: &ProviderId,
    ) -> bool {
        self.providers.iter().any(|p| &p.id == id)
    }

    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    /// Appearance of `endpoint` and registration of `provider` an attempt
    /// was started under.
    fn epochs(
        &self,
        endpoint: &EndpointDescriptor,
        provider: &ProviderId,
    ) -> AttemptEpochs {
        AttemptEpochs {
            endpoint: self.appeared_at.get(endpoint).copied(),
            provider: self.registered_at.get(provider).copied(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AttemptEpochs {
    endpoint: Option<u64>,
    provider: Option<u64>,
}

struct ReconcilerInner {
    state: Mutex<ReconcilerState>,
    events: broadcast::Sender<ImportEvent>,
    in_flight: watch::Sender<usize>,
    attempt_timeout: Duration,
}

/// Matches known endpoints to import providers.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ImportReconciler {
    inner: Arc<ReconcilerInner>,
}

impl std::fmt::Debug for ImportReconciler {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ImportReconciler")
            .field("known_endpoints", &state.known_endpoints.len())
            .field("providers", &state.providers.len())
            .field("active_imports", &state.active_imports.len())
            .field("in_flight", &state.in_flight.len())
            .finish()
    }
}

impl ImportReconciler {
    pub fn new(config: &ImportConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let (in_flight, _) = watch::channel(0);
        Self {
            inner: Arc::new(ReconcilerInner {
                state: Mutex::new(ReconcilerState::default()),
                events,
                in_flight,
                attempt_timeout: config.attempt_timeout(),
            }),
        }
    }

    /// Subscribes to import lifecycle events. Slow subscribers lag, they
    /// never block reconciliation.
    pub fn subscribe(&self) -> broadcast::Receiver<ImportEvent> {
        self.inner.events.subscribe()
    }

    /// Records `endpoint` as known and starts importing it.
    ///
    /// An endpoint that is already known is left alone.
    pub fn on_endpoint_appeared(
        &self,
        endpoint: EndpointDescriptor,
    ) {
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return;
        }
        if !state.known_endpoints.insert(endpoint.clone()) {
            trace!(%endpoint, "endpoint already known");
            return;
        }
        state.failed.remove(&endpoint);
        let epoch = state.next_epoch();
        state.appeared_at.insert(endpoint.clone(), epoch);
        debug!(%endpoint, "endpoint appeared");
        self.schedule(&mut state, endpoint);
    }

    /// Forgets `endpoint` and closes its import, if any.
    ///
    /// Returns once the handle is closed.
    pub async fn on_endpoint_disappeared(
        &self,
        endpoint: &EndpointDescriptor,
    ) {
        let record = {
            let mut state = self.inner.state.lock();
            if !state.known_endpoints.remove(endpoint) {
                trace!(%endpoint, "disappearance of unknown endpoint");
            }
            state.failed.remove(endpoint);
            state.appeared_at.remove(endpoint);
            state.active_imports.remove(endpoint)
        };

        debug!(%endpoint, "endpoint disappeared");
        if let Some(record) = record {
            self.close_record(&record).await;
        }
    }

    /// Makes `registration` available and retries every known endpoint that
    /// has no active import.
    pub fn on_provider_added(
        &self,
        registration: ProviderRegistration,
    ) {
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return;
        }
        if state.has_provider(&registration.id) {
            debug!(provider = %registration.id, "provider already registered");
            return;
        }

        info!(provider = %registration.id, "import provider added");
        for ids in state.failed.values_mut() {
            ids.remove(&registration.id);
        }
        let epoch = state.next_epoch();
        state.registered_at.insert(registration.id.clone(), epoch);
        state.providers.push(registration);

        let pending: Vec<EndpointDescriptor> = state
            .known_endpoints
            .iter()
            .filter(|e| !state.active_imports.contains_key(*e))
            .cloned()
            .collect();
        for endpoint in pending {
            self.schedule(&mut state, endpoint);
        }
    }

    /// Withdraws provider `id`, closes every import it served and re-imports
    /// the affected endpoints through the remaining providers.
    ///
    /// Returns once all of the provider's handles are closed.
    pub async fn on_provider_removed(
        &self,
        id: &ProviderId,
    ) {
        let owned: Vec<Arc<ImportRecord>> = {
            let mut state = self.inner.state.lock();
            let before = state.providers.len();
            state.providers.retain(|p| &p.id != id);
            if state.providers.len() == before {
                debug!(provider = %id, "removal of unknown provider ignored");
                return;
            }
            state.registered_at.remove(id);

            let endpoints: Vec<EndpointDescriptor> = state
                .active_imports
                .iter()
                .filter(|(_, record)| record.provider_id() == id)
                .map(|(endpoint, _)| endpoint.clone())
                .collect();
            endpoints
                .iter()
                .filter_map(|endpoint| state.active_imports.remove(endpoint))
                .collect()
        };

        info!(provider = %id, imports = owned.len(), "import provider removed");
        join_all(owned.iter().map(|record| self.close_record(record))).await;

        let mut state = self.inner.state.lock();
        for record in owned {
            self.schedule(&mut state, record.endpoint().clone());
        }
    }

    /// Completes when no import attempt is running.
    pub async fn wait_idle(&self) {
        let mut in_flight = self.inner.in_flight.subscribe();
        let _ = in_flight.wait_for(|n| *n == 0).await;
    }

    /// Stops accepting work and closes every active import.
    ///
    /// Attempts still running when this is called discard their result.
    pub async fn shutdown(&self) {
        let records: Vec<Arc<ImportRecord>> = {
            let mut state = self.inner.state.lock();
            state.shutting_down = true;
            state.known_endpoints.clear();
            state.failed.clear();
            state.appeared_at.clear();
            state.active_imports.drain().map(|(_, record)| record).collect()
        };

        info!(imports = records.len(), "import reconciler shutting down");
        join_all(records.iter().map(|record| self.close_record(record))).await;
    }

    pub fn import_record(
        &self,
        endpoint: &EndpointDescriptor,
    ) -> Option<Arc<ImportRecord>> {
        self.inner.state.lock().active_imports.get(endpoint).cloned()
    }

    /// Active imports ordered by endpoint.
    pub fn active_imports(&self) -> Vec<Arc<ImportRecord>> {
        let state = self.inner.state.lock();
        let mut records: Vec<Arc<ImportRecord>> = state.active_imports.values().cloned().collect();
        records.sort_by(|a, b| a.endpoint().cmp(b.endpoint()));
        records
    }

    pub fn known_endpoints(&self) -> BTreeSet<EndpointDescriptor> {
        self.inner.state.lock().known_endpoints.clone()
    }

    /// Registered providers in priority order.
    pub fn providers(&self) -> Vec<ProviderId> {
        self.inner.state.lock().providers.iter().map(|p| p.id.clone()).collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Spawns an attempt task for `endpoint` unless one is running or there
    /// is nothing to try.
    fn schedule(
        &self,
        state: &mut ReconcilerState,
        endpoint: EndpointDescriptor,
    ) {
        if !state.needs_import(&endpoint) || state.in_flight.contains(&endpoint) {
            return;
        }
        if state.next_candidate(&endpoint).is_none() {
            debug!(%endpoint, "no provider left to try");
            return;
        }

        state.in_flight.insert(endpoint.clone());
        self.inner.in_flight.send_replace(state.in_flight.len());

        let reconciler = self.clone();
        tokio::spawn(async move { reconciler.attempt_imports(endpoint).await });
    }

    /// Walks the providers in order until one imports `endpoint` or none is
    /// left to try.
    async fn attempt_imports(
        &self,
        endpoint: EndpointDescriptor,
    ) {
        loop {
            let (candidate, epochs) = {
                let mut state = self.inner.state.lock();
                let next = if state.needs_import(&endpoint) {
                    state.next_candidate(&endpoint)
                } else {
                    None
                };
                match next {
                    Some(candidate) => {
                        let epochs = state.epochs(&endpoint, &candidate.id);
                        (candidate, epochs)
                    }
                    None => {
                        self.finish_attempts(&mut state, &endpoint);
                        return;
                    }
                }
            };

            trace!(%endpoint, provider = %candidate.id, "attempting import");
            let outcome =
                match tokio::time::timeout(self.inner.attempt_timeout, candidate.provider.attempt_import(&endpoint))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => ImportOutcome::TransportFailure(format!(
                        "no answer within {:?}",
                        self.inner.attempt_timeout
                    )),
                };

            match outcome.into_result() {
                Ok(handle) => {
                    let record = Arc::new(ImportRecord::new(endpoint.clone(), candidate.id.clone(), handle));
                    let stale = {
                        let mut state = self.inner.state.lock();
                        if state.needs_import(&endpoint) && state.has_provider(&candidate.id) {
                            state.active_imports.insert(endpoint.clone(), record);
                            self.finish_attempts(&mut state, &endpoint);
                            None
                        } else {
                            Some(record)
                        }
                    };

                    match stale {
                        None => {
                            info!(%endpoint, provider = %candidate.id, "endpoint imported");
                            self.notify(ImportEvent::Imported {
                                endpoint,
                                provider: candidate.id,
                            });
                            return;
                        }
                        Some(record) => {
                            debug!(%endpoint, provider = %candidate.id, "discarding stale import");
                            record.close().await;
                        }
                    }
                }
                Err(failure) => {
                    self.record_failure(&endpoint, &candidate.id, epochs, &failure);
                    self.notify(ImportEvent::Failed {
                        endpoint: endpoint.clone(),
                        provider: candidate.id,
                        failure,
                    });
                }
            }
        }
    }

    fn record_failure(
        &self,
        endpoint: &EndpointDescriptor,
        provider: &ProviderId,
        epochs: AttemptEpochs,
        failure: &ImportFailure,
    ) {
        if failure.is_transient() {
            warn!(%endpoint, %provider, "import failed: {}", failure);
        } else {
            debug!(%endpoint, %provider, "import declined: {}", failure);
        }

        // only the current appearance and registration can be marked failed
        let mut state = self.inner.state.lock();
        if state.epochs(endpoint, provider) != epochs {
            debug!(%endpoint, %provider, "failure of a superseded attempt not recorded");
            return;
        }
        state.failed.entry(endpoint.clone()).or_default().insert(provider.clone());
    }

    fn finish_attempts(
        &self,
        state: &mut ReconcilerState,
        endpoint: &EndpointDescriptor,
    ) {
        state.in_flight.remove(endpoint);
        self.inner.in_flight.send_replace(state.in_flight.len());
    }

    async fn close_record(
        &self,
        record: &ImportRecord,
    ) {
        record.close().await;
        info!(endpoint = %record.endpoint(), provider = %record.provider_id(), "import removed");
        self.notify(ImportEvent::Closed {
            endpoint: record.endpoint().clone(),
            provider: record.provider_id().clone(),
        });
    }

    fn notify(
        &self,
        event: ImportEvent,
    ) {
        // no subscribers is fine
        let _ = self.inner.events.send(event);
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::import::ImportHandle;
use crate::import::ImportOutcome;
use crate::import::ImportProvider;
use crate::import::ProviderId;
use crate::import::ProviderRegistration;
use crate::EndpointDescriptor;
use crate::Error;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Accept,
    Unsupported,
    RequirementUnsatisfied,
    TransportFailure,
    /// Never answers
    Hang,
}

/// What the recording providers of one test did, keyed by endpoint key.
#[derive(Debug, Default)]
pub struct ImportLedger {
    open: Mutex<HashMap<String, usize>>,
    attempts: Mutex<Vec<(ProviderId, String)>>,
    closes: Mutex<Vec<(ProviderId, String)>>,
}

impl ImportLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Handles currently open for endpoint `key`, across all providers.
    pub fn open_count(
        &self,
        key: &str,
    ) -> usize {
        self.open.lock().get(key).copied().unwrap_or(0)
    }

    pub fn total_open(&self) -> usize {
        self.open.lock().values().sum()
    }

    pub fn attempts_by(
        &self,
        provider: &str,
    ) -> usize {
        self.attempts.lock().iter().filter(|(p, _)| p.as_str() == provider).count()
    }

    pub fn attempts_for(
        &self,
        key: &str,
    ) -> Vec<ProviderId> {
        self.attempts
            .lock()
            .iter()
            .filter(|(_, k)| k == key)
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn closes_by(
        &self,
        provider: &str,
    ) -> usize {
        self.closes.lock().iter().filter(|(p, _)| p.as_str() == provider).count()
    }

    fn opened(
        &self,
        key: &str,
    ) {
        *self.open.lock().entry(key.to_string()).or_default() += 1;
    }

    fn closed(
        &self,
        provider: &ProviderId,
        key: &str,
    ) {
        if let Some(count) = self.open.lock().get_mut(key) {
            *count = count.saturating_sub(1);
        }
        self.closes.lock().push((provider.clone(), key.to_string()));
    }
}

/// Import provider that answers with a configurable [`Behavior`] and logs
/// every attempt and close into an [`ImportLedger`].
pub struct RecordingProvider {
    id: ProviderId,
    behavior: Mutex<Behavior>,
    delay: Duration,
    fail_close: bool,
    ledger: Arc<ImportLedger>,
}

impl RecordingProvider {
    pub fn new(
        id: &str,
        behavior: Behavior,
        ledger: Arc<ImportLedger>,
    ) -> Self {
        Self {
            id: ProviderId::new(id),
            behavior: Mutex::new(behavior),
            delay: Duration::ZERO,
            fail_close: false,
            ledger,
        }
    }

    /// Answers each attempt after `delay`.
    pub fn with_delay(
        mut self,
        delay: Duration,
    ) -> Self {
        self.delay = delay;
        self
    }

    /// Handles report an error when closed.
    pub fn with_failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn set_behavior(
        &self,
        behavior: Behavior,
    ) {
        *self.behavior.lock() = behavior;
    }

    pub fn registration(self: &Arc<Self>) -> ProviderRegistration {
        ProviderRegistration::new(self.id.clone(), self.clone())
    }
}

#[async_trait]
impl ImportProvider for RecordingProvider {
    async fn attempt_import(
        &self,
        endpoint: &EndpointDescriptor,
    ) -> ImportOutcome {
        self.ledger.attempts.lock().push((self.id.clone(), endpoint.key().to_string()));
        // decided when the attempt starts
        let behavior = *self.behavior.lock();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match behavior {
            Behavior::Accept => {
                self.ledger.opened(endpoint.key());
                ImportOutcome::Success(Box::new(RecordingHandle {
                    provider: self.id.clone(),
                    key: endpoint.key().to_string(),
                    fail_close: self.fail_close,
                    ledger: self.ledger.clone(),
                }))
            }
            Behavior::Unsupported => ImportOutcome::Unsupported(format!("{} does not speak this", self.id)),
            Behavior::RequirementUnsatisfied => {
                ImportOutcome::RequirementUnsatisfied("missing intent".to_string())
            }
            Behavior::TransportFailure => ImportOutcome::TransportFailure("connection refused".to_string()),
            Behavior::Hang => futures::future::pending().await,
        }
    }
}

struct RecordingHandle {
    provider: ProviderId,
    key: String,
    fail_close: bool,
    ledger: Arc<ImportLedger>,
}

#[async_trait]
impl ImportHandle for RecordingHandle {
    async fn close(&self) -> Result<()> {
        self.ledger.closed(&self.provider, &self.key);
        if self.fail_close {
            return Err(Error::CloseFailed {
                endpoint: self.key.clone(),
                reason: "remote already gone".to_string(),
            });
        }
        Ok(())
    }
}

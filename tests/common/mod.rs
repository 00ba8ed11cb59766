use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use remote_topology::BackoffPolicy;
use remote_topology::CapabilityType;
use remote_topology::ConsumerId;
use remote_topology::DiscoveryEvent;
use remote_topology::EndpointDescriptor;
use remote_topology::ImportHandle;
use remote_topology::ImportOutcome;
use remote_topology::ImportProvider;
use remote_topology::MemoryStore;
use remote_topology::ProviderRegistration;
use remote_topology::RegistryEvent;
use remote_topology::Result;
use remote_topology::TopologyConfig;
use tokio::sync::mpsc;

pub const GREETER: &str = "org.example.Greeter";
pub const CALCULATOR: &str = "org.example.Calculator";

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    env_logger::init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}

pub fn config() -> TopologyConfig {
    let mut config = TopologyConfig::default();
    config.retry.store_watch = BackoffPolicy {
        max_retries: 0,
        timeout_ms: 500,
        base_delay_ms: 5,
        max_delay_ms: 50,
    };
    config.import.attempt_timeout_ms = 1000;
    config
}

pub fn endpoint(
    key: &str,
    capabilities: &[&str],
) -> EndpointDescriptor {
    let mut builder = EndpointDescriptor::builder(key, format!("tcp://192.168.1.10:8201/{}", key));
    for capability in capabilities {
        builder = builder.capability(*capability);
    }
    builder.build().expect("valid endpoint")
}

/// Publishes `endpoint` under every capability type it offers.
pub fn publish(
    store: &MemoryStore,
    endpoint: &EndpointDescriptor,
) {
    for ty in endpoint.capability_types() {
        store.publish(&remote_topology::path_for(&ty), endpoint).expect("publish");
    }
}

pub fn withdraw(
    store: &MemoryStore,
    endpoint: &EndpointDescriptor,
) {
    for ty in endpoint.capability_types() {
        store.remove_child(&remote_topology::path_for(&ty), endpoint.key());
    }
}

pub fn consumer_added(
    id: &str,
    capability_types: &[&str],
) -> (RegistryEvent, mpsc::UnboundedReceiver<DiscoveryEvent>) {
    let (sink, rx) = mpsc::unbounded_channel();
    let event = RegistryEvent::ConsumerAdded {
        consumer: ConsumerId::new(id),
        capability_types: capability_types.iter().map(|t| CapabilityType::new(*t)).collect::<BTreeSet<_>>(),
        sink,
    };
    (event, rx)
}

pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within {:?}", WAIT_TIMEOUT);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Counts open handles per endpoint key for every provider sharing it.
#[derive(Default)]
pub struct HandleCounter {
    open: Mutex<HashMap<String, usize>>,
    attempts: Mutex<HashMap<String, usize>>,
}

impl HandleCounter {
    pub fn open(
        &self,
        key: &str,
    ) -> usize {
        self.open.lock().get(key).copied().unwrap_or(0)
    }

    pub fn total_open(&self) -> usize {
        self.open.lock().values().sum()
    }

    pub fn attempts(
        &self,
        provider: &str,
    ) -> usize {
        self.attempts.lock().get(provider).copied().unwrap_or(0)
    }
}

/// Provider accepting or refusing every endpoint.
pub struct TestProvider {
    name: String,
    accept: bool,
    counter: Arc<HandleCounter>,
}

impl TestProvider {
    pub fn registration(
        name: &str,
        accept: bool,
        counter: &Arc<HandleCounter>,
    ) -> ProviderRegistration {
        ProviderRegistration::new(
            name,
            Arc::new(Self {
                name: name.to_string(),
                accept,
                counter: counter.clone(),
            }),
        )
    }
}

#[async_trait]
impl ImportProvider for TestProvider {
    async fn attempt_import(
        &self,
        endpoint: &EndpointDescriptor,
    ) -> ImportOutcome {
        *self.counter.attempts.lock().entry(self.name.clone()).or_default() += 1;
        if !self.accept {
            return ImportOutcome::Unsupported(format!("{} refuses {}", self.name, endpoint.key()));
        }

        *self.counter.open.lock().entry(endpoint.key().to_string()).or_default() += 1;
        ImportOutcome::Success(Box::new(TestHandle {
            key: endpoint.key().to_string(),
            counter: self.counter.clone(),
        }))
    }
}

struct TestHandle {
    key: String,
    counter: Arc<HandleCounter>,
}

#[async_trait]
impl ImportHandle for TestHandle {
    async fn close(&self) -> Result<()> {
        if let Some(open) = self.counter.open.lock().get_mut(&self.key) {
            *open -= 1;
        }
        Ok(())
    }
}

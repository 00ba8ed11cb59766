use std::time::Duration;

use tokio::sync::mpsc;

use crate::discovery::DiscoveryEvent;
use crate::BackoffPolicy;
use crate::CapabilityType;
use crate::EndpointDescriptor;
use crate::TopologyConfig;

pub const GREETER: &str = "org.example.Greeter";
pub const CALCULATOR: &str = "org.example.Calculator";

/// How long helpers wait for something that is expected to happen.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(3);

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    env_logger::init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for unit test.");
}

pub fn greeter_type() -> CapabilityType {
    CapabilityType::new(GREETER)
}

pub fn calculator_type() -> CapabilityType {
    CapabilityType::new(CALCULATOR)
}

/// Endpoint `key` offering `capability`, reachable at a per-key address.
pub fn endpoint(
    key: &str,
    capability: &str,
) -> EndpointDescriptor {
    EndpointDescriptor::builder(key, format!("tcp://10.0.0.1:9000/{}", key))
        .capability(capability)
        .build()
        .expect("valid endpoint")
}

pub fn greeter(key: &str) -> EndpointDescriptor {
    endpoint(key, GREETER)
}

pub fn fast_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 0,
        timeout_ms: 500,
        base_delay_ms: 5,
        max_delay_ms: 20,
    }
}

pub fn test_config() -> TopologyConfig {
    let mut config = TopologyConfig::default();
    config.retry.store_watch = fast_policy();
    config.import.attempt_timeout_ms = 1000;
    config
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<DiscoveryEvent>) -> DiscoveryEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for discovery event")
        .expect("discovery channel closed")
}

/// Gives pending tasks a moment, then asserts nothing was delivered.
pub async fn assert_no_event(rx: &mut mpsc::UnboundedReceiver<DiscoveryEvent>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    if let Ok(event) = rx.try_recv() {
        panic!("unexpected discovery event: {:?}", event);
    }
}

/// Polls `condition` until it holds or [`EVENT_TIMEOUT`] elapses.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within {:?}", EVENT_TIMEOUT);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

//! Discovery and import reconciliation for remote service endpoints.
//!
//! Remote endpoints are published as children of per-capability nodes in a
//! coordination store. Local consumers declare the capability types they care
//! about; one [`InterfaceMonitor`] per (consumer, capability type) keeps a
//! one-shot watch armed on the matching node and reports endpoints appearing
//! and disappearing. The [`ImportReconciler`] turns discovered endpoints into
//! local proxies through the registered [`ImportProvider`]s, keeping at most
//! one active import per endpoint.
//!
//! [`TopologyManager`] wires both halves behind a single stream of
//! [`RegistryEvent`]s:
//!
//! ```ignore
//! let store = Arc::new(MemoryStore::new());
//! let config = TopologyConfig::new()?.validate()?;
//! let manager = TopologyManager::new(store, &config);
//! manager.run(registry_events, shutdown_signal).await;
//! ```

mod config;
pub mod constants;
mod discovery;
mod endpoint;
mod errors;
mod import;
mod store;
mod topology;
mod utils;

pub use config::*;
pub use discovery::*;
pub use endpoint::*;
pub use errors::*;
pub use import::*;
pub use store::*;
pub use topology::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;

//! Import reconciliation.
//!
//! Matches discovered endpoints against the available [`ImportProvider`]s and
//! keeps at most one active [`ImportRecord`] per endpoint. Provider calls and
//! handle closes run outside the reconciler's critical section; their results
//! re-enter it only to install or discard a record.

mod reconciler;
mod record;

pub use reconciler::*;
pub use record::*;


use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::EndpointDescriptor;
use crate::Result;

/// Registration identity of an import provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A live local proxy for a remote endpoint.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImportHandle: Send + Sync + 'static {
    /// Releases the proxy. Implementations should tolerate a remote side that
    /// already went away.
    async fn close(&self) -> Result<()>;
}

/// Result of asking a provider to import an endpoint.
pub enum ImportOutcome {
    Success(Box<dyn ImportHandle>),
    /// The provider does not handle this kind of endpoint
    Unsupported(String),
    /// The endpoint requires intents or configuration the provider lacks
    RequirementUnsatisfied(String),
    /// The endpoint could not be reached
    TransportFailure(String),
}

impl fmt::Debug for ImportOutcome {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ImportOutcome::Success(_) => f.write_str("Success(..)"),
            ImportOutcome::Unsupported(reason) => f.debug_tuple("Unsupported").field(reason).finish(),
            ImportOutcome::RequirementUnsatisfied(reason) => {
                f.debug_tuple("RequirementUnsatisfied").field(reason).finish()
            }
            ImportOutcome::TransportFailure(reason) => {
                f.debug_tuple("TransportFailure").field(reason).finish()
            }
        }
    }
}

impl ImportOutcome {
    pub fn into_result(self) -> std::result::Result<Box<dyn ImportHandle>, ImportFailure> {
        match self {
            ImportOutcome::Success(handle) => Ok(handle),
            ImportOutcome::Unsupported(reason) => Err(ImportFailure::Unsupported(reason)),
            ImportOutcome::RequirementUnsatisfied(reason) => {
                Err(ImportFailure::RequirementUnsatisfied(reason))
            }
            ImportOutcome::TransportFailure(reason) => Err(ImportFailure::TransportFailure(reason)),
        }
    }
}

/// Why a provider did not import an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImportFailure {
    #[error("unsupported endpoint: {0}")]
    Unsupported(String),

    #[error("requirement unsatisfied: {0}")]
    RequirementUnsatisfied(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),
}

impl ImportFailure {
    /// Transport failures may succeed on a later attempt; the others hold
    /// until the endpoint or the provider changes.
    pub fn is_transient(&self) -> bool {
        matches!(self, ImportFailure::TransportFailure(_))
    }
}

/// Component able to turn an endpoint descriptor into a local proxy.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImportProvider: Send + Sync + 'static {
    async fn attempt_import(
        &self,
        endpoint: &EndpointDescriptor,
    ) -> ImportOutcome;
}

/// An import provider as announced by the registry.
#[derive(Clone)]
pub struct ProviderRegistration {
    pub id: ProviderId,
    pub provider: Arc<dyn ImportProvider>,
}

impl ProviderRegistration {
    pub fn new(
        id: impl Into<ProviderId>,
        provider: Arc<dyn ImportProvider>,
    ) -> Self {
        Self {
            id: id.into(),
            provider,
        }
    }
}

impl fmt::Debug for ProviderRegistration {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ProviderRegistration").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Import lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportEvent {
    Imported {
        endpoint: EndpointDescriptor,
        provider: ProviderId,
    },
    Closed {
        endpoint: EndpointDescriptor,
        provider: ProviderId,
    },
    Failed {
        endpoint: EndpointDescriptor,
        provider: ProviderId,
        failure: ImportFailure,
    },
}

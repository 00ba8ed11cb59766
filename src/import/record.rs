use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tracing::debug;
use tracing::warn;

use super::ImportHandle;
use super::ProviderId;
use crate::EndpointDescriptor;

/// Bookkeeping for one active import.
pub struct ImportRecord {
    endpoint: EndpointDescriptor,
    provider_id: ProviderId,
    handle: Box<dyn ImportHandle>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ImportRecord {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ImportRecord")
            .field("endpoint", &self.endpoint)
            .field("provider_id", &self.provider_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl ImportRecord {
    pub(crate) fn new(
        endpoint: EndpointDescriptor,
        provider_id: ProviderId,
        handle: Box<dyn ImportHandle>,
    ) -> Self {
        Self {
            endpoint,
            provider_id,
            handle,
            closed: AtomicBool::new(false),
        }
    }

    pub fn endpoint(&self) -> &EndpointDescriptor {
        &self.endpoint
    }

    pub fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the import handle once.
    ///
    /// Later calls are no-ops. A failing close is logged and swallowed: by the
    /// time a record is closed the endpoint has already left the desired state.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        match self.handle.close().await {
            Ok(()) => debug!(endpoint = %self.endpoint, provider = %self.provider_id, "import closed"),
            Err(e) => warn!(
                endpoint = %self.endpoint,
                provider = %self.provider_id,
                "closing import failed: {}", e
            ),
        }
    }
}

use std::collections::BTreeSet;
use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use crate::discovery::ConsumerId;
use crate::discovery::DiscoveryEvent;
use crate::discovery::DiscoveryEventKind;
use crate::import::ImportReconciler;
use crate::CapabilityType;
use crate::EndpointDescriptor;

/// A discovery event together with the consumer whose monitor produced it.
#[derive(Debug, Clone)]
pub(crate) struct SourcedEvent {
    pub(crate) consumer: ConsumerId,
    pub(crate) event: DiscoveryEvent,
}

pub(crate) type ImportFeed = mpsc::UnboundedSender<SourcedEvent>;

/// Feeds discovery events into the reconciler.
///
/// An endpoint may be reported by several (consumer, capability type) pairs.
/// It is announced to the reconciler on the first report and withdrawn once
/// no pair reports it any more.
pub(crate) struct ImportPump {
    reconciler: ImportReconciler,
    feed: mpsc::UnboundedReceiver<SourcedEvent>,
    seen: HashMap<EndpointDescriptor, BTreeSet<(ConsumerId, CapabilityType)>>,
    cancel: CancellationToken,
}

impl ImportPump {
    pub(crate) fn new(
        reconciler: ImportReconciler,
        feed: mpsc::UnboundedReceiver<SourcedEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reconciler,
            feed,
            seen: HashMap::new(),
            cancel,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("import pump cancelled");
                    return;
                }
                sourced = self.feed.recv() => match sourced {
                    Some(sourced) => self.forward(sourced).await,
                    None => {
                        debug!("import feed closed");
                        return;
                    }
                }
            }
        }
    }

    pub(crate) async fn forward(
        &mut self,
        sourced: SourcedEvent,
    ) {
        let SourcedEvent { consumer, event } = sourced;
        trace!(%consumer, kind = ?event.kind, endpoint = %event.endpoint, "import feed");
        let source = (consumer, event.capability_type);

        match event.kind {
            DiscoveryEventKind::Appeared => {
                let sources = self.seen.entry(event.endpoint.clone()).or_default();
                let first = sources.is_empty();
                sources.insert(source);
                if first {
                    self.reconciler.on_endpoint_appeared(event.endpoint);
                }
            }
            DiscoveryEventKind::Disappeared => {
                let Some(sources) = self.seen.get_mut(&event.endpoint) else {
                    return;
                };
                sources.remove(&source);
                if sources.is_empty() {
                    self.seen.remove(&event.endpoint);
                    self.reconciler.on_endpoint_disappeared(&event.endpoint).await;
                }
            }
        }
    }
}

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use super::ImportFeed;
use super::SourcedEvent;
use crate::discovery::ConsumerId;
use crate::discovery::DiscoveryEvent;
use crate::discovery::DiscoverySender;

/// Delivers the discovery events of one consumer's monitors to the consumer,
/// then to the import pump.
pub(crate) struct ConsumerRelay {
    consumer: ConsumerId,
    inbox: mpsc::UnboundedReceiver<DiscoveryEvent>,
    sink: DiscoverySender,
    import_feed: ImportFeed,
    cancel: CancellationToken,
}

impl ConsumerRelay {
    pub(crate) fn new(
        consumer: ConsumerId,
        inbox: mpsc::UnboundedReceiver<DiscoveryEvent>,
        sink: DiscoverySender,
        import_feed: ImportFeed,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            consumer,
            inbox,
            sink,
            import_feed,
            cancel,
        }
    }

    /// Runs until every sender of the inbox is gone or the relay is cancelled.
    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                event = self.inbox.recv() => match event {
                    Some(event) => self.forward(event),
                    None => {
                        debug!(consumer = %self.consumer, "consumer relay drained");
                        return;
                    }
                }
            }
        }
    }

    fn forward(
        &self,
        event: DiscoveryEvent,
    ) {
        if self.sink.send(event.clone()).is_err() {
            trace!(consumer = %self.consumer, "consumer channel closed");
        }
        let sourced = SourcedEvent {
            consumer: self.consumer.clone(),
            event,
        };
        if self.import_feed.send(sourced).is_err() {
            trace!(consumer = %self.consumer, "import feed closed");
        }
    }
}

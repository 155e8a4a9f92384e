//! Stream handles: the consumer side of one open event stream.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::streaming::SseEvent;

/// How an event stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The server finished the response normally.
    Completed,
    /// The connection failed mid-stream.
    Failed(String),
    /// The consumer called [`StreamHandle::close`].
    Closed,
}

#[derive(Debug)]
enum StreamItem {
    Event(SseEvent),
    End(StreamOutcome),
}

/// Consumer side of an open stream.
///
/// Events come out in the order the producer sent them. Dropping the handle
/// closes the stream.
#[derive(Debug)]
pub struct StreamHandle {
    items: mpsc::UnboundedReceiver<StreamItem>,
    cancel: CancellationToken,
    outcome: Option<StreamOutcome>,
}

/// Producer side of a [`StreamHandle`].
#[derive(Debug)]
pub struct StreamFeed {
    items: mpsc::UnboundedSender<StreamItem>,
    cancel: CancellationToken,
}

impl StreamHandle {
    /// Create a connected producer/consumer pair.
    pub fn channel() -> (StreamFeed, StreamHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let feed = StreamFeed {
            items: tx,
            cancel: cancel.clone(),
        };
        let handle = StreamHandle {
            items: rx,
            cancel,
            outcome: None,
        };
        (feed, handle)
    }

    /// Next raw event, or `None` once the stream has ended for any reason.
    ///
    /// After `None`, [`outcome`](Self::outcome) tells how it ended. Events
    /// still buffered when the handle is closed are never returned.
    pub async fn next_event(&mut self) -> Option<SseEvent> {
        if self.outcome.is_some() {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.outcome = Some(StreamOutcome::Closed);
            return None;
        }

        match self.items.recv().await {
            Some(StreamItem::Event(event)) => Some(event),
            Some(StreamItem::End(outcome)) => {
                self.outcome = Some(outcome);
                None
            }
            None => {
                self.outcome = Some(StreamOutcome::Failed(
                    "stream producer went away".to_string(),
                ));
                None
            }
        }
    }

    /// Terminate the stream. Idempotent.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            debug!("closing event stream");
            self.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `None` while the stream is still live.
    pub fn outcome(&self) -> Option<StreamOutcome> {
        self.outcome.clone().or_else(|| {
            self.cancel
                .is_cancelled()
                .then_some(StreamOutcome::Closed)
        })
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl StreamFeed {
    /// Deliver one event. Returns `false` once the consumer has closed.
    pub fn send(&self, event: SseEvent) -> bool {
        !self.cancel.is_cancelled() && self.items.send(StreamItem::Event(event)).is_ok()
    }

    /// End the stream with `outcome`.
    pub fn finish(self, outcome: StreamOutcome) {
        let _ = self.items.send(StreamItem::End(outcome));
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the consumer closes or drops the handle.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }
}

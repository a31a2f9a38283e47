//! Store change notification.
//!
//! A thin wrapper over `tokio::sync::broadcast`:
//!
//! - **At-most-once delivery**: a lagging subscriber skips events (logged)
//! - **No replay**: only events after `subscribe()` are seen
//! - **Explicit end**: `recv()` returns `None` once the store closes

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::resource::Resource;

pub const DEFAULT_FEED_CAPACITY: usize = 10000;

/// A persisted change.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    Inserted(Resource),
    Updated(Resource),
}

impl StoreEvent {
    pub fn resource(&self) -> &Resource {
        match self {
            StoreEvent::Inserted(r) | StoreEvent::Updated(r) => r,
        }
    }

    pub fn into_resource(self) -> Resource {
        match self {
            StoreEvent::Inserted(r) | StoreEvent::Updated(r) => r,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, StoreEvent::Inserted(_))
    }
}

/// Subscription to a store's change events.
#[derive(Debug)]
pub struct ChangeFeed {
    receiver: Option<broadcast::Receiver<StoreEvent>>,
}

impl ChangeFeed {
    pub fn new(receiver: broadcast::Receiver<StoreEvent>) -> Self {
        Self {
            receiver: Some(receiver),
        }
    }

    /// A feed that is already finished.
    pub fn closed() -> Self {
        Self { receiver: None }
    }

    /// Next event, or `None` once the store has closed.
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "change feed lagged, events dropped");
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceDescriptor;

    #[tokio::test]
    async fn delivers_then_ends_when_sender_drops() {
        let (tx, rx) = broadcast::channel(4);
        let mut feed = ChangeFeed::new(rx);

        tx.send(StoreEvent::Inserted(Resource::seed(ResourceDescriptor::url(
            "http://a.com",
        ))))
        .unwrap();
        drop(tx);

        let event = feed.recv().await.unwrap();
        assert!(event.is_insert());
        assert!(feed.recv().await.is_none());
        assert!(feed.is_closed());
    }

    #[tokio::test]
    async fn lagged_receiver_keeps_going() {
        let (tx, rx) = broadcast::channel(1);
        let mut feed = ChangeFeed::new(rx);
        for i in 0..3 {
            tx.send(StoreEvent::Updated(Resource::seed(ResourceDescriptor::of_kind(
                "n",
                serde_json::json!(i),
            ))))
            .unwrap();
        }
        let event = feed.recv().await.unwrap();
        assert_eq!(event.resource().data.as_value(), Some(&serde_json::json!(2)));
    }

    #[tokio::test]
    async fn closed_feed_returns_none() {
        assert!(ChangeFeed::closed().recv().await.is_none());
    }
}

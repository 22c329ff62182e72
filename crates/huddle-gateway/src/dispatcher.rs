use std::sync::Arc;

use tokio::sync::broadcast;

/// Notification that a collection gained a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionChanged {
    pub collection: String,
}

/// Fans out collection changes to every connected feed socket. Each socket
/// decides for itself whether the change touches its subscription and, if so,
/// re-queries and pushes a full snapshot.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for change notifications: all sockets receive all
    changes_tx: broadcast::Sender<CollectionChanged>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (changes_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner { changes_tx }),
        }
    }

    /// Subscribe to change notifications. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<CollectionChanged> {
        self.inner.changes_tx.subscribe()
    }

    /// Announce that `collection` changed. A send with no listeners is fine.
    pub fn notify_changed(&self, collection: &str) {
        let _ = self.inner.changes_tx.send(CollectionChanged {
            collection: collection.to_string(),
        });
    }

    /// Number of live feed sockets.
    pub fn listener_count(&self) -> usize {
        self.inner.changes_tx.receiver_count()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notifications_reach_every_listener() {
        let dispatcher = Dispatcher::new();
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();
        assert_eq!(dispatcher.listener_count(), 2);

        dispatcher.notify_changed("messages");

        assert_eq!(a.recv().await.unwrap().collection, "messages");
        assert_eq!(b.recv().await.unwrap().collection, "messages");
    }

    #[test]
    fn notify_without_listeners_is_harmless() {
        let dispatcher = Dispatcher::new();
        dispatcher.notify_changed("messages");
        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[tokio::test]
    async fn dropped_receivers_stop_counting() {
        let dispatcher = Dispatcher::new();
        let rx = dispatcher.subscribe();
        drop(rx);
        assert_eq!(dispatcher.listener_count(), 0);
    }
}

//! In-process feed and blob store.
//!
//! `MemoryFeed` behaves like the hosted feed: every write pushes a full,
//! ordered snapshot to each subscriber of the collection. It backs offline
//! demos and the test suites of code built on [`MessageSync`].
//!
//! [`MessageSync`]: crate::manager::MessageSync

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;

use huddle_types::api::{Direction, FeedQuery, ORDER_BY_CREATED_AT};
use huddle_types::models::{Message, sort_newest_first};

use crate::attachments::{BlobRef, BlobStorage};
use crate::error::RemoteError;
use crate::feed::{FeedItem, FeedSubscription, RemoteFeed, Unsubscribe};

#[derive(Clone, Default)]
pub struct MemoryFeed {
    inner: Arc<Mutex<FeedState>>,
}

#[derive(Default)]
struct FeedState {
    /// Documents per collection, in insertion order.
    collections: HashMap<String, Vec<Message>>,
    subscribers: Vec<Subscriber>,
    next_subscriber: u64,
    next_document: u64,
    unreachable: bool,
}

struct Subscriber {
    id: u64,
    query: FeedQuery,
    tx: mpsc::UnboundedSender<FeedItem>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the service being down: subscribe and add fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.state().unreachable = !reachable;
    }

    /// Number of subscriptions that have not been cancelled.
    pub fn live_subscriptions(&self) -> usize {
        let mut state = self.state();
        state.subscribers.retain(|s| !s.tx.is_closed());
        state.subscribers.len()
    }

    /// Current documents of a collection, newest first.
    pub fn documents(&self, collection: &str) -> Vec<Message> {
        let state = self.state();
        ordered(&state, collection, Direction::Desc)
    }

    /// Send a non-fatal error to every subscriber of `collection`.
    pub fn report_error(&self, collection: &str, message: &str) {
        let state = self.state();
        for sub in state.subscribers.iter().filter(|s| s.query.collection == collection) {
            let _ = sub.tx.send(FeedItem::Error(message.to_string()));
        }
    }

    /// Store a document as if another participant wrote it and return its id.
    pub fn insert(&self, collection: &str, message: &Message) -> String {
        let mut state = self.state();
        state.next_document += 1;
        let id = format!("doc-{}", state.next_document);

        let mut stored = message.clone();
        stored.id = Some(id.clone());
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(stored);

        notify(&mut state, collection);
        id
    }

    // Poisoning only happens if a holder panicked; the state is still usable.
    fn state(&self) -> MutexGuard<'_, FeedState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn ordered(state: &FeedState, collection: &str, direction: Direction) -> Vec<Message> {
    let stored = state.collections.get(collection).map(Vec::as_slice).unwrap_or(&[]);
    match direction {
        Direction::Desc => {
            // Latest insert first among equal timestamps
            let mut docs: Vec<Message> = stored.iter().rev().cloned().collect();
            sort_newest_first(&mut docs);
            docs
        }
        Direction::Asc => {
            let mut docs = stored.to_vec();
            docs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            docs
        }
    }
}

fn notify(state: &mut FeedState, collection: &str) {
    state.subscribers.retain(|s| !s.tx.is_closed());
    for sub in state.subscribers.iter().filter(|s| s.query.collection == collection) {
        let snapshot = ordered(state, collection, sub.query.direction);
        debug!("Memory feed: {} documents to subscriber {}", snapshot.len(), sub.id);
        let _ = sub.tx.send(FeedItem::Snapshot(snapshot));
    }
}

impl RemoteFeed for MemoryFeed {
    async fn subscribe(&self, query: FeedQuery) -> Result<FeedSubscription, RemoteError> {
        if query.order_by != ORDER_BY_CREATED_AT {
            return Err(RemoteError::Rejected {
                status: 400,
                message: format!("unsupported order key: {}", query.order_by),
            });
        }

        let mut state = self.state();
        if state.unreachable {
            return Err(RemoteError::Unreachable("memory feed offline".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(FeedItem::Snapshot(ordered(&state, &query.collection, query.direction)));

        state.next_subscriber += 1;
        let id = state.next_subscriber;
        state.subscribers.push(Subscriber { id, query, tx });

        let inner = Arc::downgrade(&self.inner);
        let unsubscribe = Unsubscribe::new(move || {
            if let Some(inner) = inner.upgrade() {
                let mut state = inner.lock().unwrap_or_else(|e| e.into_inner());
                state.subscribers.retain(|s| s.id != id);
            }
        });

        Ok(FeedSubscription {
            items: rx,
            unsubscribe,
        })
    }

    async fn add_document(&self, collection: &str, message: &Message) -> Result<String, RemoteError> {
        if self.state().unreachable {
            return Err(RemoteError::Unreachable("memory feed offline".into()));
        }
        Ok(self.insert(collection, message))
    }
}

/// Blob store keeping bytes in memory. URLs use the `memory://` scheme.
#[derive(Clone, Default)]
pub struct MemoryBlobStorage {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .blobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl BlobStorage for MemoryBlobStorage {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<BlobRef, RemoteError> {
        self.blobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), bytes);
        Ok(BlobRef {
            key: key.to_string(),
            url: None,
        })
    }

    async fn download_url(&self, blob: &BlobRef) -> Result<String, RemoteError> {
        if self.get(&blob.key).is_none() {
            return Err(RemoteError::Rejected {
                status: 404,
                message: format!("no blob {}", blob.key),
            });
        }
        Ok(format!("memory://{}", blob.key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn msg(text: &str, secs: i64) -> Message {
        Message {
            id: None,
            author_id: "u1".into(),
            author_name: "Ada".into(),
            text: Some(text.into()),
            image: None,
            location: None,
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    fn texts(snapshot: &FeedItem) -> Vec<String> {
        match snapshot {
            FeedItem::Snapshot(docs) => docs.iter().filter_map(|m| m.text.clone()).collect(),
            FeedItem::Error(e) => panic!("unexpected error item: {}", e),
        }
    }

    #[tokio::test]
    async fn subscribe_delivers_current_view_then_every_change() {
        let feed = MemoryFeed::new();
        feed.insert("messages", &msg("a", 1));

        let mut sub = feed.subscribe(FeedQuery::newest_first("messages")).await.unwrap();
        assert_eq!(texts(&sub.items.recv().await.unwrap()), vec!["a"]);

        feed.add_document("messages", &msg("b", 2)).await.unwrap();
        assert_eq!(texts(&sub.items.recv().await.unwrap()), vec!["b", "a"]);

        // Other collections do not wake this subscriber
        feed.insert("elsewhere", &msg("x", 3));
        assert!(sub.items.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancelled_subscription_stops_counting() {
        let feed = MemoryFeed::new();
        let sub = feed.subscribe(FeedQuery::newest_first("messages")).await.unwrap();
        assert_eq!(feed.live_subscriptions(), 1);

        sub.unsubscribe.cancel();
        assert_eq!(feed.live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn unreachable_feed_refuses_work() {
        let feed = MemoryFeed::new();
        feed.set_reachable(false);
        assert!(feed.subscribe(FeedQuery::newest_first("messages")).await.is_err());
        assert!(feed.add_document("messages", &msg("a", 1)).await.is_err());
        assert!(feed.documents("messages").is_empty());
    }

    #[tokio::test]
    async fn unknown_order_key_is_rejected() {
        let feed = MemoryFeed::new();
        let query = FeedQuery {
            collection: "messages".into(),
            order_by: "text".into(),
            direction: Direction::Desc,
        };
        assert!(matches!(
            feed.subscribe(query).await,
            Err(RemoteError::Rejected { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn blob_urls_exist_only_after_upload() {
        let blobs = MemoryBlobStorage::new();
        let missing = BlobRef {
            key: "nope".into(),
            url: None,
        };
        assert!(blobs.download_url(&missing).await.is_err());

        let blob = blobs.upload("u1-1-a.jpg", vec![1, 2, 3]).await.unwrap();
        assert_eq!(blobs.download_url(&blob).await.unwrap(), "memory://u1-1-a.jpg");
        assert_eq!(blobs.get("u1-1-a.jpg"), Some(vec![1, 2, 3]));
    }
}

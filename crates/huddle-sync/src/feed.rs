use std::fmt;
use std::future::Future;

use tokio::sync::mpsc;

use huddle_types::api::FeedQuery;
use huddle_types::models::Message;

use crate::error::RemoteError;

/// What a live subscription delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    /// The full current ordered view of the query.
    Snapshot(Vec<Message>),
    /// Non-fatal problem reported by the feed; the subscription stays open.
    Error(String),
}

/// Cancels a subscription exactly once, either explicitly or when dropped.
pub struct Unsubscribe {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Unsubscribe {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to release.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.fire();
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// An open subscription: the snapshot stream plus the handle that ends it.
#[derive(Debug)]
pub struct FeedSubscription {
    pub items: mpsc::UnboundedReceiver<FeedItem>,
    pub unsubscribe: Unsubscribe,
}

/// The hosted, ordered document feed that carries the conversation.
pub trait RemoteFeed: Send + Sync + 'static {
    /// Open a subscription. Every change to the query's documents is pushed
    /// as a full snapshot in query order.
    fn subscribe(
        &self,
        query: FeedQuery,
    ) -> impl Future<Output = Result<FeedSubscription, RemoteError>> + Send;

    /// Write a new document and return the id the feed assigned to it.
    fn add_document(
        &self,
        collection: &str,
        message: &Message,
    ) -> impl Future<Output = Result<String, RemoteError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn unsubscribe_fires_once_on_cancel() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = Unsubscribe::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        handle.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_fires_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        {
            let _handle = Unsubscribe::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn noop_handle_is_inert() {
        let handle = Unsubscribe::noop();
        assert!(format!("{:?}", handle).contains("armed: false"));
        handle.cancel();
    }
}

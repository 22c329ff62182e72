use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use huddle_types::api::FeedQuery;
use huddle_types::models::{Message, MessageDraft, Session, sort_newest_first};

use crate::cache::{LocalCache, load_snapshot, store_snapshot};
use crate::config::SyncConfig;
use crate::error::RemoteError;
use crate::feed::{FeedItem, FeedSubscription, RemoteFeed, Unsubscribe};

/// Alert raised when the device drops offline.
pub const CONNECTION_LOST: &str = "Connection Lost!";

/// What observers (the chat screen) receive.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncUpdate {
    /// The full list to render, newest first.
    Messages(Vec<Message>),
    Connectivity { online: bool },
    /// Non-fatal problem worth a banner, e.g. a feed error.
    Banner(String),
    /// User-facing alert: connection lost, permission denied, and so on.
    Alert(String),
}

/// Owns the message list of one conversation and keeps it in step with the
/// remote feed while online and with the local cache while offline.
///
/// Clones share the same conversation. At most one feed subscription is live
/// at any time; it is released on the offline transition, on [`close`], and
/// when the last clone is dropped.
///
/// Connectivity changes are applied one at a time, in call order, even when
/// they arrive on different clones.
///
/// [`close`]: MessageSync::close
pub struct MessageSync<F, C> {
    inner: Arc<Inner<F, C>>,
}

impl<F, C> Clone for MessageSync<F, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<F, C> {
    feed: F,
    cache: C,
    session: Session,
    config: SyncConfig,
    state: Mutex<SyncState>,
    updates: broadcast::Sender<SyncUpdate>,
    /// Held for the whole of a connectivity transition.
    transition: AsyncMutex<()>,
    /// Held by an in-flight snapshot write; the offline load waits for it.
    cache_gate: Arc<AsyncMutex<()>>,
}

#[derive(Default)]
struct SyncState {
    connected: Option<bool>,
    /// Bumped on every transition; work started under an older epoch is stale.
    epoch: u64,
    messages: Vec<Message>,
    subscription: Option<ActiveSubscription>,
    /// Messages not yet written to the feed, oldest first.
    outbox: Vec<Message>,
    /// A flush task is draining the outbox.
    flushing: bool,
    closed: bool,
}

impl SyncState {
    /// Feed writes are only allowed once the current online subscription is up.
    fn can_write(&self) -> bool {
        !self.closed && self.connected == Some(true) && self.subscription.is_some()
    }
}

/// A live subscription and the task pumping its snapshots. Dropping it
/// cancels both.
struct ActiveSubscription {
    _unsubscribe: Unsubscribe,
    pump: JoinHandle<()>,
}

impl Drop for ActiveSubscription {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl<F: RemoteFeed, C: LocalCache> MessageSync<F, C> {
    pub fn new(feed: F, cache: C, session: Session, config: SyncConfig) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                feed,
                cache,
                session,
                config,
                state: Mutex::new(SyncState::default()),
                updates,
                transition: AsyncMutex::new(()),
                cache_gate: Arc::new(AsyncMutex::new(())),
            }),
        }
    }

    /// Subscribe to updates. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncUpdate> {
        self.inner.updates.subscribe()
    }

    /// The list as last published.
    pub fn messages(&self) -> Vec<Message> {
        self.inner.state().messages.clone()
    }

    /// `None` until the first connectivity signal.
    pub fn connected(&self) -> Option<bool> {
        self.inner.state().connected
    }

    pub fn has_live_subscription(&self) -> bool {
        self.inner.state().subscription.is_some()
    }

    /// Messages not yet written to the feed.
    pub fn pending(&self) -> usize {
        self.inner.state().outbox.len()
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// React to the connectivity signal. `None` (unknown) and a repeat of
    /// the current state are not transitions and change nothing.
    pub async fn on_connectivity_change(&self, signal: Option<bool>) {
        let Some(online) = signal else {
            debug!("Connectivity unknown, keeping current mode");
            return;
        };

        let _transition = self.inner.transition.lock().await;
        let epoch = {
            let mut state = self.inner.state();
            if state.closed || state.connected == Some(online) {
                return;
            }
            state.connected = Some(online);
            state.epoch += 1;
            if state.subscription.take().is_some() {
                debug!("Cancelled feed subscription");
            }

            self.inner.publish(SyncUpdate::Connectivity { online });
            if !online {
                self.inner.publish(SyncUpdate::Alert(CONNECTION_LOST.to_string()));
            }
            state.epoch
        };

        if online {
            info!("Online: subscribing to '{}'", self.inner.config.collection);
            self.go_online(epoch).await;
        } else {
            info!("Offline: showing cached '{}'", self.inner.config.cache_key);
            self.go_offline(epoch).await;
        }
    }

    async fn go_online(&self, epoch: u64) {
        let query = FeedQuery::newest_first(self.inner.config.collection.clone());
        let subscription = match self.inner.feed.subscribe(query).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!("Feed subscription failed: {}", e);
                self.inner
                    .publish(SyncUpdate::Banner(format!("Could not reach the chat feed: {}", e)));
                return;
            }
        };
        let FeedSubscription { items, unsubscribe } = subscription;

        let mut state = self.inner.state();
        if state.closed || state.epoch != epoch {
            debug!("Connectivity changed while subscribing, dropping the new subscription");
            drop(state);
            unsubscribe.cancel();
            return;
        }

        let pump = tokio::spawn(pump_snapshots(Arc::downgrade(&self.inner), epoch, items));
        state.subscription = Some(ActiveSubscription {
            _unsubscribe: unsubscribe,
            pump,
        });
        if !state.outbox.is_empty() {
            info!("Flushing {} messages sent while offline", state.outbox.len());
        }
        self.inner.start_flush(&mut state);
    }

    async fn go_offline(&self, epoch: u64) {
        let cached = {
            let _gate = self.inner.cache_gate.lock().await;
            load_snapshot(&self.inner.cache, &self.inner.config.cache_key).await
        };

        let mut state = self.inner.state();
        if state.closed || state.epoch != epoch {
            return;
        }

        // Unsent messages stay visible on top of the cached view
        let mut messages: Vec<Message> = state.outbox.iter().rev().cloned().collect();
        messages.extend(cached);
        sort_newest_first(&mut messages);

        debug!("Loaded {} messages for offline view", messages.len());
        state.messages = messages.clone();
        self.inner.publish(SyncUpdate::Messages(messages));
    }

    /// Send a message. It is shown at the head of the list immediately and
    /// queued in the outbox, which is written to the feed in send order
    /// whenever the conversation is online. Must be called from within a
    /// tokio runtime.
    pub fn send(&self, draft: MessageDraft) -> Message {
        let message = Message::compose(&self.inner.session, draft, Utc::now());

        let mut state = self.inner.state();
        if state.closed {
            warn!("Send on a closed conversation ignored");
            return message;
        }

        state.messages.insert(0, message.clone());
        self.inner.publish(SyncUpdate::Messages(state.messages.clone()));

        state.outbox.push(message.clone());
        if state.can_write() {
            self.inner.start_flush(&mut state);
        } else {
            debug!("Not online, queueing message");
        }

        message
    }

    /// Raise a user-facing alert on this conversation.
    pub fn alert(&self, text: impl Into<String>) {
        self.inner.publish(SyncUpdate::Alert(text.into()));
    }

    /// Leave the conversation: cancel any live subscription. Idempotent.
    pub fn close(&self) {
        let mut state = self.inner.state();
        if !state.closed {
            info!("Closing conversation '{}'", self.inner.config.collection);
        }
        state.closed = true;
        state.epoch += 1;
        state.subscription = None;
        if !state.outbox.is_empty() {
            warn!("Discarding {} unsent messages", state.outbox.len());
            state.outbox.clear();
        }
    }
}

impl<F: RemoteFeed, C: LocalCache> Inner<F, C> {
    // Poisoning only happens if a holder panicked; the state is still usable.
    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, update: SyncUpdate) {
        // No receivers is fine
        let _ = self.updates.send(update);
    }

    /// Replace the list wholesale with a feed snapshot. Returns the list to
    /// cache, or `None` if the snapshot is stale.
    fn apply_snapshot(&self, epoch: u64, mut documents: Vec<Message>) -> Option<Vec<Message>> {
        sort_newest_first(&mut documents);

        let mut state = self.state();
        if state.closed || state.epoch != epoch {
            debug!("Discarding snapshot from a cancelled subscription");
            return None;
        }

        debug!("Snapshot: {} messages", documents.len());
        state.messages = documents.clone();
        self.publish(SyncUpdate::Messages(documents.clone()));
        Some(documents)
    }

    fn feed_error(&self, epoch: u64, message: String) {
        let state = self.state();
        if state.closed || state.epoch != epoch {
            return;
        }
        warn!("Feed reported: {}", message);
        self.publish(SyncUpdate::Banner(message));
    }

    /// Start draining the outbox unless a flush is already running.
    fn start_flush(self: &Arc<Self>, state: &mut SyncState) {
        if state.flushing || state.outbox.is_empty() || !state.can_write() {
            return;
        }
        state.flushing = true;
        tokio::spawn(flush_outbox(Arc::downgrade(self)));
    }
}

/// Write queued messages one at a time, oldest first. A message leaves the
/// outbox only once its write has been attempted; writing stops as soon as
/// the conversation is no longer online.
async fn flush_outbox<F: RemoteFeed, C: LocalCache>(handle: Weak<Inner<F, C>>) {
    loop {
        let Some(inner) = handle.upgrade() else { return };
        let message = {
            let mut state = inner.state();
            match state.outbox.first() {
                Some(next) if state.can_write() => next.clone(),
                _ => {
                    state.flushing = false;
                    return;
                }
            }
        };

        let result = inner.feed.add_document(&inner.config.collection, &message).await;

        let mut state = inner.state();
        match result {
            Ok(id) => debug!("Message acknowledged as {}", id),
            Err(RemoteError::Unreachable(e)) => {
                warn!("Feed unreachable, keeping {} queued messages: {}", state.outbox.len(), e);
                state.flushing = false;
                return;
            }
            Err(e) => {
                warn!("Message write failed: {}", e);
                inner.publish(SyncUpdate::Banner(format!("Message not delivered: {}", e)));
            }
        }
        // close() may have emptied the outbox meanwhile
        if state.outbox.first() == Some(&message) {
            state.outbox.remove(0);
        }
    }
}

/// Feed snapshots into the conversation until the stream ends, the task is
/// aborted, or the conversation is gone.
async fn pump_snapshots<F: RemoteFeed, C: LocalCache>(
    inner: Weak<Inner<F, C>>,
    epoch: u64,
    mut items: mpsc::UnboundedReceiver<FeedItem>,
) {
    while let Some(item) = items.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        match item {
            FeedItem::Snapshot(documents) => {
                let gate = inner.cache_gate.clone().lock_owned().await;
                if let Some(snapshot) = inner.apply_snapshot(epoch, documents) {
                    // Runs to completion even if the pump is aborted meanwhile
                    let writer = inner.clone();
                    let store = tokio::spawn(async move {
                        store_snapshot(&writer.cache, &writer.config.cache_key, &snapshot).await;
                        drop(gate);
                    });
                    if let Err(e) = store.await {
                        warn!("Snapshot cache write failed: {}", e);
                    }
                }
            }
            FeedItem::Error(message) => inner.feed_error(epoch, message),
        }
    }
    debug!("Snapshot stream ended");
}

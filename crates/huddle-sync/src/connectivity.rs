use tokio::sync::watch;
use tracing::{debug, info};

use crate::cache::LocalCache;
use crate::feed::RemoteFeed;
use crate::manager::MessageSync;

/// Drive `sync` from a connectivity signal until the signal's sender goes
/// away, then close the conversation.
///
/// The current value is applied first, so a signal that already reads
/// online subscribes right away. `None` means the state is not known yet.
pub async fn follow_connectivity<F, C>(sync: MessageSync<F, C>, mut signal: watch::Receiver<Option<bool>>)
where
    F: RemoteFeed,
    C: LocalCache,
{
    let initial = *signal.borrow_and_update();
    sync.on_connectivity_change(initial).await;

    while signal.changed().await.is_ok() {
        let value = *signal.borrow_and_update();
        debug!("Connectivity signal: {:?}", value);
        sync.on_connectivity_change(value).await;
    }

    info!("Connectivity signal closed");
    sync.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_types::models::{BackgroundColor, Session};

    use crate::cache::MemoryCache;
    use crate::config::SyncConfig;
    use crate::manager::SyncUpdate;
    use crate::memory::MemoryFeed;

    fn sync(feed: &MemoryFeed) -> MessageSync<MemoryFeed, MemoryCache> {
        let session = Session {
            user_id: "u1".into(),
            display_name: "Ada".into(),
            background_color: BackgroundColor::Green,
        };
        MessageSync::new(feed.clone(), MemoryCache::new(), session, SyncConfig::default())
    }

    async fn next_connectivity(rx: &mut tokio::sync::broadcast::Receiver<SyncUpdate>) -> bool {
        loop {
            if let SyncUpdate::Connectivity { online } = rx.recv().await.unwrap() {
                return online;
            }
        }
    }

    #[tokio::test]
    async fn follows_transitions_and_closes_when_the_signal_ends() {
        let feed = MemoryFeed::new();
        let sync = sync(&feed);
        let mut rx = sync.subscribe();
        let (tx, signal) = watch::channel(Some(true));

        let task = tokio::spawn(follow_connectivity(sync.clone(), signal));
        assert!(next_connectivity(&mut rx).await);

        tx.send(Some(false)).unwrap();
        assert!(!next_connectivity(&mut rx).await);

        tx.send(Some(true)).unwrap();
        assert!(next_connectivity(&mut rx).await);

        drop(tx);
        task.await.unwrap();
        assert!(!sync.has_live_subscription());
        assert_eq!(feed.live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn unknown_initial_state_waits_for_a_real_signal() {
        let feed = MemoryFeed::new();
        let sync = sync(&feed);
        let (tx, signal) = watch::channel(None);

        let task = tokio::spawn(follow_connectivity(sync.clone(), signal));
        tokio::task::yield_now().await;
        assert_eq!(sync.connected(), None);

        drop(tx);
        task.await.unwrap();
        assert_eq!(sync.connected(), None);
    }
}

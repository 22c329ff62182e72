use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::client::HuddleClient;

/// Something that can tell whether the backend is reachable right now.
pub trait Reachability: Send + Sync + 'static {
    fn reachable(&self) -> impl Future<Output = bool> + Send;
}

impl Reachability for HuddleClient {
    async fn reachable(&self) -> bool {
        self.health().await
    }
}

/// Poll `target` every `interval` and publish the result as a connectivity
/// signal. The signal starts unknown (`None`) and only changes when the
/// answer does. The task ends once every receiver is gone.
pub fn spawn_health_probe<R: Reachability>(
    target: R,
    interval: Duration,
) -> (watch::Receiver<Option<bool>>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(None);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tx.closed() => break,
            }

            let online = target.reachable().await;
            tx.send_if_modified(|current| {
                if *current == Some(online) {
                    return false;
                }
                info!("Server {}", if online { "reachable" } else { "unreachable" });
                *current = Some(online);
                true
            });
        }
    });

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct Toggle {
        up: Arc<AtomicBool>,
        checks: Arc<AtomicUsize>,
    }

    impl Reachability for Toggle {
        async fn reachable(&self) -> bool {
            self.checks.fetch_add(1, Ordering::SeqCst);
            self.up.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_only_changes() {
        let target = Toggle::default();
        target.up.store(true, Ordering::SeqCst);
        let (mut rx, _task) = spawn_health_probe(target.clone(), Duration::from_secs(1));
        assert_eq!(*rx.borrow(), None);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(true));

        // Several more polls with the same answer stay silent
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(target.checks.load(Ordering::SeqCst) >= 3);
        assert!(!rx.has_changed().unwrap());

        target.up.store(false, Ordering::SeqCst);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_nobody_listens() {
        let (rx, task) = spawn_health_probe(Toggle::default(), Duration::from_secs(1));
        drop(rx);
        task.await.unwrap();
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use huddle_db::Database;
use huddle_types::api::{FeedQuery, ORDER_BY_CREATED_AT};
use huddle_types::events::{FeedCommand, FeedEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Time allowed between upgrade and a valid Identify.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Work queued by the command reader for the socket writer.
enum Outbound {
    /// The subscription changed; push a fresh snapshot.
    Refresh,
    Event(FeedEvent),
}

/// Handle one feed WebSocket: Identify, then at most one live query whose
/// snapshots are pushed on subscribe and after every change to its collection.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    let user_id = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("Feed client failed to identify, closing");
            return;
        }
    };

    info!("{} connected to feed", user_id);

    if send_event(&mut sender, &FeedEvent::Ready { user_id }).await.is_err() {
        return;
    }

    let query: Arc<RwLock<Option<FeedQuery>>> = Arc::new(RwLock::new(None));
    let send_query = query.clone();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();

    // Set by the reader on every Pong
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut changes_rx = dispatcher.subscribe();

    // Spawn task to push snapshots + queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = changes_rx.recv() => {
                    let changed = match result {
                        Ok(changed) => Some(changed.collection),
                        // Snapshots are full views, so one refresh covers every missed change
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Change receiver lagged by {} notifications", n);
                            None
                        }
                        Err(_) => break,
                    };

                    let current = current_query(&send_query);
                    let Some(current) = current else { continue };
                    if changed.is_some_and(|c| c != current.collection) {
                        continue;
                    }

                    if push_snapshot(&mut sender, &db, current).await.is_err() {
                        break;
                    }
                }
                outbound = out_rx.recv() => {
                    let result = match outbound {
                        Some(Outbound::Refresh) => match current_query(&send_query) {
                            Some(current) => push_snapshot(&mut sender, &db, current).await,
                            None => Ok(()),
                        },
                        Some(Outbound::Event(event)) => send_event(&mut sender, &event).await,
                        None => break,
                    };
                    if result.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<FeedCommand>(&text) {
                    Ok(cmd) => handle_command(user_id, cmd, &query, &out_tx),
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!("{} bad feed command: {} -- raw: {}", user_id, e, raw);
                        let _ = out_tx.send(Outbound::Event(FeedEvent::Error {
                            message: format!("bad command: {}", e),
                        }));
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("{} disconnected from feed", user_id);
}

fn handle_command(
    user_id: Uuid,
    cmd: FeedCommand,
    query: &RwLock<Option<FeedQuery>>,
    out_tx: &mpsc::UnboundedSender<Outbound>,
) {
    match cmd {
        FeedCommand::Identify { .. } => {} // Already handled

        FeedCommand::Subscribe(requested) => {
            if let Err(message) = validate_query(&requested) {
                let _ = out_tx.send(Outbound::Event(FeedEvent::Error { message }));
                return;
            }

            info!(
                "{} subscribing to '{}' ordered by {} {:?}",
                user_id, requested.collection, requested.order_by, requested.direction
            );
            match query.write() {
                Ok(mut current) => *current = Some(requested),
                Err(e) => {
                    error!("Feed query lock poisoned: {}", e);
                    return;
                }
            }
            let _ = out_tx.send(Outbound::Refresh);
        }
    }
}

/// Only `created_at` ordering over a named collection is supported.
pub fn validate_query(query: &FeedQuery) -> Result<(), String> {
    if query.collection.trim().is_empty() {
        return Err("collection must not be empty".into());
    }
    if query.order_by != ORDER_BY_CREATED_AT {
        return Err(format!("unsupported order key: {}", query.order_by));
    }
    Ok(())
}

fn current_query(query: &RwLock<Option<FeedQuery>>) -> Option<FeedQuery> {
    query.read().ok().and_then(|q| q.clone())
}

async fn push_snapshot(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    db: &Arc<Database>,
    query: FeedQuery,
) -> Result<(), axum::Error> {
    let db = db.clone();
    let collection = query.collection.clone();
    let loaded = tokio::task::spawn_blocking(move || db.get_messages(&query.collection, query.direction)).await;

    let event = match loaded {
        Ok(Ok(documents)) => {
            debug!("Snapshot of '{}': {} documents", collection, documents.len());
            FeedEvent::Snapshot { documents }
        }
        Ok(Err(e)) => {
            error!("Snapshot query for '{}' failed: {}", collection, e);
            FeedEvent::Error {
                message: "snapshot query failed".into(),
            }
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            FeedEvent::Error {
                message: "snapshot query failed".into(),
            }
        }
    };

    send_event(sender, &event).await
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &FeedEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode feed event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Uuid> {
    use huddle_types::api::Claims;
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(FeedCommand::Identify { token }) = serde_json::from_str::<FeedCommand>(&text) {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(token_data.claims.sub);
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_types::api::Direction;

    #[test]
    fn only_created_at_ordering_is_accepted() {
        assert!(validate_query(&FeedQuery::newest_first("messages")).is_ok());

        let by_author = FeedQuery {
            collection: "messages".into(),
            order_by: "author_id".into(),
            direction: Direction::Asc,
        };
        assert!(validate_query(&by_author).is_err());
        assert!(validate_query(&FeedQuery::newest_first("  ")).is_err());
    }

    #[test]
    fn subscribe_replaces_query_and_requests_refresh() {
        let query = RwLock::new(Some(FeedQuery::newest_first("old")));
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_command(
            Uuid::new_v4(),
            FeedCommand::Subscribe(FeedQuery::newest_first("messages")),
            &query,
            &tx,
        );

        assert_eq!(current_query(&query).unwrap().collection, "messages");
        assert!(matches!(rx.try_recv(), Ok(Outbound::Refresh)));
    }

    #[test]
    fn invalid_subscribe_keeps_query_and_reports_error() {
        let query = RwLock::new(None);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bad = FeedQuery {
            collection: "messages".into(),
            order_by: "text".into(),
            direction: Direction::Desc,
        };

        handle_command(Uuid::new_v4(), FeedCommand::Subscribe(bad), &query, &tx);

        assert!(current_query(&query).is_none());
        assert!(matches!(rx.try_recv(), Ok(Outbound::Event(FeedEvent::Error { .. }))));
    }
}

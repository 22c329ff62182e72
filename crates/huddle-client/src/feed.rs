use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use url::Url;

use huddle_sync::{FeedItem, FeedSubscription, Unsubscribe};
use huddle_types::api::FeedQuery;
use huddle_types::events::{FeedCommand, FeedEvent};

use crate::error::ClientError;

/// How long the server gets to confirm Identify.
const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Open the feed socket, authenticate, and subscribe to `query`.
///
/// Snapshots and feed errors arrive on the returned receiver. The returned
/// `Unsubscribe` closes the socket; the server drops the subscription with it.
pub async fn open_feed(url: &Url, token: &str, query: FeedQuery) -> Result<FeedSubscription, ClientError> {
    let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    send_command(&mut ws_tx, &FeedCommand::Identify { token: token.to_string() }).await?;

    let ready = tokio::time::timeout(READY_TIMEOUT, async {
        while let Some(frame) = ws_rx.next().await {
            match decode(frame?) {
                Some(FeedEvent::Ready { user_id }) => return Ok(user_id),
                Some(FeedEvent::Error { message }) => {
                    return Err(ClientError::Status { status: 401, message });
                }
                _ => continue,
            }
        }
        Err(ClientError::Protocol("feed closed before Ready".into()))
    })
    .await
    .map_err(|_| ClientError::Protocol("timed out waiting for Ready".into()))??;
    debug!("Feed ready for {}", ready);

    let collection = query.collection.clone();
    send_command(&mut ws_tx, &FeedCommand::Subscribe(query)).await?;
    info!("Subscribed to '{}'", collection);

    let (items_tx, items_rx) = mpsc::unbounded_channel();
    let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = ws_rx.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => {
                            warn!("Feed socket error: {}", e);
                            let _ = items_tx.send(FeedItem::Error(format!("Feed connection lost: {}", e)));
                            break;
                        }
                        None => {
                            let _ = items_tx.send(FeedItem::Error("Feed connection closed".into()));
                            break;
                        }
                    };
                    let item = match decode(frame) {
                        Some(FeedEvent::Snapshot { documents }) => FeedItem::Snapshot(documents),
                        Some(FeedEvent::Error { message }) => FeedItem::Error(message),
                        Some(FeedEvent::Ready { .. }) | None => continue,
                    };
                    if items_tx.send(item).is_err() {
                        break;
                    }
                }
                _ = &mut cancel_rx => {
                    debug!("Unsubscribing from '{}'", collection);
                    break;
                }
                _ = items_tx.closed() => break,
            }
        }
        let _ = ws_tx.send(WsMessage::Close(None)).await;
    });

    Ok(FeedSubscription {
        items: items_rx,
        unsubscribe: Unsubscribe::new(move || {
            let _ = cancel_tx.send(());
        }),
    })
}

async fn send_command<S>(ws_tx: &mut S, command: &FeedCommand) -> Result<(), ClientError>
where
    S: SinkExt<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(command).map_err(|e| ClientError::Protocol(e.to_string()))?;
    ws_tx.send(WsMessage::Text(json.into())).await?;
    Ok(())
}

/// Parse a server frame. Control frames and unknown payloads yield `None`.
fn decode(frame: WsMessage) -> Option<FeedEvent> {
    match frame {
        WsMessage::Text(text) => match serde_json::from_str(text.as_str()) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Unreadable feed event: {}", e);
                None
            }
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_frames_decode() {
        let frame = WsMessage::Text(r#"{"type":"Snapshot","data":{"documents":[]}}"#.into());
        assert!(matches!(decode(frame), Some(FeedEvent::Snapshot { documents }) if documents.is_empty()));
    }

    #[test]
    fn control_and_garbage_frames_are_skipped() {
        assert!(decode(WsMessage::Ping(Vec::new().into())).is_none());
        assert!(decode(WsMessage::Text("not json".into())).is_none());
    }
}

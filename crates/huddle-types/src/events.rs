use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::FeedQuery;
use crate::models::Message;

/// Events sent over the feed WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FeedEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid },

    /// Full ordered view of the subscribed collection
    Snapshot { documents: Vec<Message> },

    /// The request could not be served; the socket stays open
    Error { message: String },
}

/// Commands sent FROM client TO server over the feed WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FeedCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start receiving snapshots for one query. A second Subscribe replaces
    /// the first.
    Subscribe(FeedQuery),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_adjacently_tagged() {
        let cmd = FeedCommand::Subscribe(FeedQuery::newest_first("messages"));
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "Subscribe");
        assert_eq!(json["data"]["collection"], "messages");
        assert_eq!(json["data"]["direction"], "desc");
    }
}

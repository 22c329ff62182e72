use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Location, Message};

// -- JWT Claims --

/// JWT claims shared by huddle-api (REST middleware) and huddle-gateway
/// (WebSocket identify).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInResponse {
    pub user_id: Uuid,
    pub token: String,
}

// -- Documents --

/// Body of an add-document request: a message without its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewDocument {
    pub author_id: String,
    pub author_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub created_at: DateTime<Utc>,
}

impl NewDocument {
    pub fn into_message(self, id: String) -> Message {
        Message {
            id: Some(id),
            author_id: self.author_id,
            author_name: self.author_name,
            text: self.text,
            image: self.image,
            location: self.location,
            created_at: self.created_at,
        }
    }
}

impl From<&Message> for NewDocument {
    fn from(m: &Message) -> Self {
        Self {
            author_id: m.author_id.clone(),
            author_name: m.author_name.clone(),
            text: m.text.clone(),
            image: m.image.clone(),
            location: m.location,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddDocumentResponse {
    pub id: String,
}

/// Sort direction of a feed query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    #[default]
    Desc,
}

/// The only order key the feed understands.
pub const ORDER_BY_CREATED_AT: &str = "created_at";

/// A subscription or listing request: one collection, one order key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedQuery {
    pub collection: String,
    #[serde(default = "default_order_by")]
    pub order_by: String,
    #[serde(default)]
    pub direction: Direction,
}

fn default_order_by() -> String {
    ORDER_BY_CREATED_AT.to_string()
}

impl FeedQuery {
    /// Newest-first query over a collection.
    pub fn newest_first(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            order_by: default_order_by(),
            direction: Direction::Desc,
        }
    }
}

// -- Blobs --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub key: String,
    pub size: u64,
    /// Durable public download URL of the blob.
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_query_defaults_to_created_at_desc() {
        let q: FeedQuery = serde_json::from_str(r#"{"collection":"messages"}"#).unwrap();
        assert_eq!(q, FeedQuery::newest_first("messages"));
    }

    #[test]
    fn new_document_rejects_client_supplied_id() {
        let body = r#"{"id":"x","author_id":"u","author_name":"n","created_at":"2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<NewDocument>(body).is_err());
    }
}

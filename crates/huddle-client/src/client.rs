use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, info};
use url::Url;

use huddle_sync::{AuthClient, BlobRef, BlobStorage, FeedSubscription, RemoteError, RemoteFeed};
use huddle_types::api::{AddDocumentResponse, Direction, FeedQuery, NewDocument, SignInResponse, UploadResponse};
use huddle_types::models::Message;

use crate::config::{endpoint, feed_url};
use crate::error::ClientError;
use crate::feed::open_feed;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// REST + WebSocket client for one huddle server. Clones share the token.
#[derive(Clone)]
pub struct HuddleClient {
    http: Client,
    base: Url,
    token: Arc<RwLock<Option<String>>>,
}

impl HuddleClient {
    pub fn new(base: Url) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base,
            token: Arc::new(RwLock::new(None)),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn token(&self) -> Result<String, ClientError> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(ClientError::NotSignedIn)
    }

    fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        Ok(builder.bearer_auth(self.token()?))
    }

    /// POST /auth/anonymous. Stores the token for later calls.
    pub async fn sign_in(&self) -> Result<SignInResponse, ClientError> {
        let url = endpoint(&self.base, &["auth", "anonymous"])?;
        let response = checked(self.http.post(url).send().await?).await?;
        let signed_in: SignInResponse = response.json().await?;

        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(signed_in.token.clone());
        info!("Signed in anonymously as {}", signed_in.user_id);
        Ok(signed_in)
    }

    /// POST /collections/{collection}/documents
    pub async fn add(&self, collection: &str, message: &Message) -> Result<String, ClientError> {
        let url = endpoint(&self.base, &["collections", collection, "documents"])?;
        let body = NewDocument::from(message);
        let response = checked(self.authorized(self.http.post(url))?.json(&body).send().await?).await?;
        let created: AddDocumentResponse = response.json().await?;
        debug!("Added document {} to '{}'", created.id, collection);
        Ok(created.id)
    }

    /// GET /collections/{collection}/documents, ordered as `query` asks.
    pub async fn list(&self, query: &FeedQuery) -> Result<Vec<Message>, ClientError> {
        let url = endpoint(&self.base, &["collections", &query.collection, "documents"])?;
        let direction = match query.direction {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        };
        let request = self
            .authorized(self.http.get(url))?
            .query(&[("order_by", query.order_by.as_str()), ("direction", direction)]);
        let response = checked(request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// PUT /blobs/{key} with the raw bytes.
    pub async fn put_blob(&self, key: &str, bytes: Vec<u8>) -> Result<UploadResponse, ClientError> {
        let url = endpoint(&self.base, &["blobs", key])?;
        let request = self
            .authorized(self.http.put(url))?
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes);
        let response = checked(request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// GET /health. Any failure reads as unhealthy.
    pub async fn health(&self) -> bool {
        let Ok(url) = endpoint(&self.base, &["health"]) else {
            return false;
        };
        match self.http.get(url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Health check failed: {}", e);
                false
            }
        }
    }
}

/// Turn non-2xx responses into `ClientError::Status` carrying the body.
async fn checked(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    let message = if message.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        message
    };
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

impl AuthClient for HuddleClient {
    async fn sign_in_anonymously(&self) -> Result<String, RemoteError> {
        Ok(self.sign_in().await?.user_id.to_string())
    }
}

impl RemoteFeed for HuddleClient {
    async fn subscribe(&self, query: FeedQuery) -> Result<FeedSubscription, RemoteError> {
        let url = feed_url(&self.base)?;
        let token = self.token()?;
        Ok(open_feed(&url, &token, query).await?)
    }

    async fn add_document(&self, collection: &str, message: &Message) -> Result<String, RemoteError> {
        Ok(self.add(collection, message).await?)
    }
}

impl BlobStorage for HuddleClient {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<BlobRef, RemoteError> {
        let uploaded = self.put_blob(key, bytes).await?;
        Ok(BlobRef {
            key: uploaded.key,
            url: Some(uploaded.url),
        })
    }

    async fn download_url(&self, blob: &BlobRef) -> Result<String, RemoteError> {
        match &blob.url {
            Some(url) => Ok(url.clone()),
            None => Ok(endpoint(&self.base, &["blobs", &blob.key])?.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HuddleClient {
        HuddleClient::new(Url::parse("http://127.0.0.1:3000").unwrap()).unwrap()
    }

    #[tokio::test]
    async fn calls_needing_a_token_fail_before_sign_in() {
        let client = client();
        let err = client.add("messages", &sample()).await.unwrap_err();
        assert!(matches!(err, ClientError::NotSignedIn));
    }

    #[tokio::test]
    async fn download_url_prefers_the_server_supplied_one() {
        let client = client();
        let with_url = BlobRef {
            key: "k".into(),
            url: Some("https://cdn.example.com/k".into()),
        };
        assert_eq!(client.download_url(&with_url).await.unwrap(), "https://cdn.example.com/k");

        let bare = BlobRef {
            key: "u1-5-a.jpg".into(),
            url: None,
        };
        assert_eq!(
            client.download_url(&bare).await.unwrap(),
            "http://127.0.0.1:3000/blobs/u1-5-a.jpg"
        );
    }

    fn sample() -> Message {
        Message {
            id: None,
            author_id: "u1".into(),
            author_name: "Ada".into(),
            text: Some("hi".into()),
            image: None,
            location: None,
            created_at: chrono::Utc::now(),
        }
    }
}

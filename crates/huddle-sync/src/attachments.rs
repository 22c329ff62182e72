//! Image and location attachments.
//!
//! An image is uploaded to blob storage under a key unique to the sender and
//! the moment of upload, then sent as a message carrying its download URL. A
//! location is a single position fix sent as-is. Any failure is returned to
//! the caller and also raised as an alert on the conversation.

use std::future::Future;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use huddle_types::models::{Location, Message, MessageDraft};

use crate::cache::LocalCache;
use crate::error::{AttachmentError, RemoteError};
use crate::feed::RemoteFeed;
use crate::manager::MessageSync;

/// Reference to an uploaded blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub key: String,
    /// Download URL, when the store hands one back with the upload.
    pub url: Option<String>,
}

/// Hosted blob storage for attachment bytes.
pub trait BlobStorage: Send + Sync + 'static {
    fn upload(&self, key: &str, bytes: Vec<u8>) -> impl Future<Output = Result<BlobRef, RemoteError>> + Send;

    /// Durable URL other participants can fetch the blob from.
    fn download_url(&self, blob: &BlobRef) -> impl Future<Output = Result<String, RemoteError>> + Send;
}

#[derive(Debug, Error)]
#[error("position unavailable: {0}")]
pub struct PositionError(pub String);

/// Device geolocation.
pub trait LocationProvider: Send + Sync {
    fn request_permission(&self) -> impl Future<Output = bool> + Send;

    /// One current fix. `Ok(None)` means the device produced no fix.
    fn current_position(&self) -> impl Future<Output = Result<Option<Location>, PositionError>> + Send;
}

/// Photo library or camera. Both hand back a local resource locator.
pub trait ImageSource: Send + Sync {
    fn request_permission(&self) -> impl Future<Output = bool> + Send;

    /// `None` when the user backed out of the picker.
    fn pick(&self) -> impl Future<Output = Option<String>> + Send;
}

/// Last `/`-separated segment of a locator.
pub fn basename(locator: &str) -> &str {
    locator.rsplit('/').next().unwrap_or(locator)
}

/// `{sender_id}-{timestamp_millis}-{basename}`. Two uploads by one sender in
/// the same millisecond with the same file name share a key.
pub fn storage_key(sender_id: &str, timestamp_millis: i64, locator: &str) -> String {
    format!("{}-{}-{}", sender_id, timestamp_millis, basename(locator))
}

/// Filesystem path behind a locator, with any `file://` scheme removed.
pub fn local_path(locator: &str) -> &str {
    locator.strip_prefix("file://").unwrap_or(locator)
}

/// The "+" action sheet of the chat screen.
pub struct AttachmentActions<B, L> {
    blobs: B,
    location: L,
}

impl<B: BlobStorage, L: LocationProvider> AttachmentActions<B, L> {
    pub fn new(blobs: B, location: L) -> Self {
        Self { blobs, location }
    }

    /// "Choose From Library" / "Take Picture".
    pub async fn send_image_from<F, C, S>(
        &self,
        sync: &MessageSync<F, C>,
        source: &S,
    ) -> Result<Message, AttachmentError>
    where
        F: RemoteFeed,
        C: LocalCache,
        S: ImageSource,
    {
        let result: Result<Message, AttachmentError> = async {
            if !source.request_permission().await {
                return Err(AttachmentError::PermissionDenied);
            }
            let locator = source.pick().await.ok_or(AttachmentError::Cancelled)?;
            self.upload_image(sync, &locator).await
        }
        .await;

        raise_on_failure(sync, result)
    }

    /// Upload the resource behind `locator` and send its URL.
    pub async fn upload_and_send_image<F, C>(
        &self,
        sync: &MessageSync<F, C>,
        locator: &str,
    ) -> Result<Message, AttachmentError>
    where
        F: RemoteFeed,
        C: LocalCache,
    {
        let result = self.upload_image(sync, locator).await;
        raise_on_failure(sync, result)
    }

    /// "Send Location".
    pub async fn send_location<F, C>(&self, sync: &MessageSync<F, C>) -> Result<Message, AttachmentError>
    where
        F: RemoteFeed,
        C: LocalCache,
    {
        let result: Result<Message, AttachmentError> = async {
            if !self.location.request_permission().await {
                return Err(AttachmentError::PermissionDenied);
            }
            let fix = match self.location.current_position().await {
                Ok(Some(fix)) => fix,
                Ok(None) => return Err(AttachmentError::LocationUnavailable),
                Err(e) => {
                    warn!("Location fix failed: {}", e);
                    return Err(AttachmentError::LocationUnavailable);
                }
            };
            Ok(sync.send(MessageDraft::location(fix)))
        }
        .await;

        raise_on_failure(sync, result)
    }

    async fn upload_image<F, C>(&self, sync: &MessageSync<F, C>, locator: &str) -> Result<Message, AttachmentError>
    where
        F: RemoteFeed,
        C: LocalCache,
    {
        let key = storage_key(&sync.session().user_id, Utc::now().timestamp_millis(), locator);

        let bytes = tokio::fs::read(local_path(locator))
            .await
            .map_err(|source| AttachmentError::Read {
                locator: locator.to_string(),
                source,
            })?;

        let size = bytes.len();
        let blob = self.blobs.upload(&key, bytes).await.map_err(AttachmentError::Upload)?;
        let url = self
            .blobs
            .download_url(&blob)
            .await
            .map_err(AttachmentError::Upload)?;

        info!("Uploaded {} ({} bytes)", key, size);
        Ok(sync.send(MessageDraft::image(url)))
    }
}

fn raise_on_failure<F, C>(
    sync: &MessageSync<F, C>,
    result: Result<Message, AttachmentError>,
) -> Result<Message, AttachmentError>
where
    F: RemoteFeed,
    C: LocalCache,
{
    if let Err(e) = &result {
        sync.alert(e.to_string());
    }
    result
}

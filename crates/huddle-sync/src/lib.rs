//! Message sync for a single conversation: live feed subscription while
//! online, local cache while offline, optimistic write-through on send.

pub mod attachments;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod feed;
pub mod manager;
pub mod memory;
pub mod session;

pub use attachments::{AttachmentActions, BlobRef, BlobStorage, ImageSource, LocationProvider};
pub use cache::{LocalCache, MESSAGES_CACHE_KEY, MemoryCache, SqliteCache};
pub use config::SyncConfig;
pub use connectivity::follow_connectivity;
pub use error::{AttachmentError, CacheError, RemoteError, SessionError};
pub use feed::{FeedItem, FeedSubscription, RemoteFeed, Unsubscribe};
pub use manager::{CONNECTION_LOST, MessageSync, SyncUpdate};
pub use memory::{MemoryBlobStorage, MemoryFeed};
pub use session::{AuthClient, SessionBuilder};

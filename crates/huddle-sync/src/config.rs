use crate::cache::MESSAGES_CACHE_KEY;

/// Collection the conversation lives in.
pub const DEFAULT_COLLECTION: &str = "messages";

/// Where a conversation reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub collection: String,
    /// Cache entry holding the serialized snapshot.
    pub cache_key: String,
}

impl SyncConfig {
    pub fn for_collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            cache_key: MESSAGES_CACHE_KEY.to_string(),
        }
    }
}

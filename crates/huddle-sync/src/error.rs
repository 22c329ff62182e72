use thiserror::Error;

/// Failure talking to a hosted collaborator (feed, blob storage, auth).
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("service unreachable: {0}")]
    Unreachable(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Protocol(String),
}

/// Local cache failures. These are logged and never shown to the user.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("cache lock poisoned")]
    Poisoned,

    #[error("cache task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Why an attachment could not be sent. The display text is what the user
/// sees in the alert.
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("Permissions haven't been granted.")]
    PermissionDenied,

    #[error("No image was selected.")]
    Cancelled,

    #[error("Error occurred while fetching location")]
    LocationUnavailable,

    #[error("Could not read {locator}: {source}")]
    Read {
        locator: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload failed: {0}")]
    Upload(#[source] RemoteError),
}

/// Start-screen failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Sign-in failed: {0}")]
    SignIn(#[from] RemoteError),
}

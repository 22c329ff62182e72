use thiserror::Error;

use huddle_sync::RemoteError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("not signed in")]
    NotSignedIn,

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<ClientError> for RemoteError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Status { status, message } => RemoteError::Rejected { status, message },
            ClientError::NotSignedIn => RemoteError::Rejected {
                status: 401,
                message: "not signed in".into(),
            },
            ClientError::Http(e) if e.is_connect() || e.is_timeout() => RemoteError::Unreachable(e.to_string()),
            ClientError::WebSocket(e) => RemoteError::Unreachable(e.to_string()),
            other => RemoteError::Protocol(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_keep_their_code() {
        let remote: RemoteError = ClientError::Status {
            status: 403,
            message: "author mismatch".into(),
        }
        .into();
        assert!(matches!(remote, RemoteError::Rejected { status: 403, .. }));
    }

    #[test]
    fn missing_token_reads_as_unauthorized() {
        let remote: RemoteError = ClientError::NotSignedIn.into();
        assert!(matches!(remote, RemoteError::Rejected { status: 401, .. }));
    }
}

use std::future::Future;

use tracing::{info, warn};

use huddle_types::models::{BackgroundColor, Session};

use crate::error::{RemoteError, SessionError};

/// Anonymous authentication against the hosted backend.
pub trait AuthClient: Send + Sync {
    /// Sign in without credentials and return the new user id.
    fn sign_in_anonymously(&self) -> impl Future<Output = Result<String, RemoteError>> + Send;
}

/// Start-screen state: a display name and a background colour, turned into
/// a [`Session`] by signing in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionBuilder {
    name: String,
    color: BackgroundColor,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn color(mut self, color: BackgroundColor) -> Self {
        self.color = color;
        self
    }

    /// Sign in and hand back the session for the chat screen. On failure
    /// the builder is untouched, so the user can simply try again.
    pub async fn start<A: AuthClient>(&self, auth: &A) -> Result<Session, SessionError> {
        let user_id = auth.sign_in_anonymously().await.map_err(|e| {
            warn!("Anonymous sign-in failed: {}", e);
            SessionError::SignIn(e)
        })?;

        info!("Signed in as {} ({})", self.name, user_id);
        Ok(Session {
            user_id,
            display_name: self.name.clone(),
            background_color: self.color,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAuth(Result<&'static str, ()>);

    impl AuthClient for FixedAuth {
        async fn sign_in_anonymously(&self) -> Result<String, RemoteError> {
            self.0
                .map(str::to_string)
                .map_err(|_| RemoteError::Unreachable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn successful_sign_in_carries_name_and_colour() {
        let session = SessionBuilder::new()
            .name("Ada")
            .color(BackgroundColor::Purple)
            .start(&FixedAuth(Ok("u42")))
            .await
            .unwrap();

        assert_eq!(session.user_id, "u42");
        assert_eq!(session.display_name, "Ada");
        assert_eq!(session.background_color, BackgroundColor::Purple);
    }

    #[tokio::test]
    async fn failed_sign_in_is_reported_and_retryable() {
        let builder = SessionBuilder::new().name("Ada");

        let err = builder.start(&FixedAuth(Err(()))).await.unwrap_err();
        assert!(err.to_string().starts_with("Sign-in failed"));

        let session = builder.start(&FixedAuth(Ok("u1"))).await.unwrap();
        assert_eq!(session.background_color, BackgroundColor::Black);
    }
}

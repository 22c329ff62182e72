use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{error, warn};

pub use huddle_types::api::Claims;

use crate::auth::AppState;

/// Extract and validate JWT from Authorization header. The token must also
/// name a user this server still knows, so a client holding a token from a
/// wiped database is sent back to sign in.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = verify_token(&state.jwt_secret, token).ok_or(StatusCode::UNAUTHORIZED)?;

    let db = state.db.clone();
    let uid = claims.sub.to_string();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_id(&uid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("DB get_user_by_id error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    if user.is_none() {
        warn!("Token for unknown user {}", claims.sub);
        return Err(StatusCode::UNAUTHORIZED);
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub fn verify_token(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::create_token;
    use uuid::Uuid;

    #[test]
    fn issued_tokens_verify_with_the_same_secret_only() {
        let user_id = Uuid::new_v4();
        let token = create_token("s3cret", user_id).unwrap();

        assert_eq!(verify_token("s3cret", &token).unwrap().sub, user_id);
        assert!(verify_token("other", &token).is_none());
        assert!(verify_token("s3cret", "not-a-jwt").is_none());
    }
}

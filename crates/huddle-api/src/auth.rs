use std::path::PathBuf;
use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use huddle_db::Database;
use huddle_gateway::dispatcher::Dispatcher;
use huddle_types::api::{Claims, SignInResponse};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    /// Directory holding uploaded blob bytes, one file per key.
    pub blob_dir: PathBuf,
    /// Externally reachable base URL, used to build blob download URLs.
    pub public_url: String,
}

/// Anonymous tokens stay valid for 30 days.
const TOKEN_TTL_DAYS: i64 = 30;

/// POST /auth/anonymous: creates a fresh user id and returns a token for it.
pub async fn sign_in_anonymously(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = Uuid::new_v4();

    let db = state.db.clone();
    let uid = user_id.to_string();
    tokio::task::spawn_blocking(move || db.create_user(&uid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("DB create_user error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let token = create_token(&state.jwt_secret, user_id).map_err(|e| {
        error!("Token encoding failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    info!("Anonymous sign-in: {}", user_id);

    Ok((StatusCode::CREATED, Json(SignInResponse { user_id, token })))
}

pub fn create_token(secret: &str, user_id: Uuid) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, error, warn};

use huddle_gateway::connection::validate_query;
use huddle_types::api::{AddDocumentResponse, Direction, FeedQuery, NewDocument, ORDER_BY_CREATED_AT};

use crate::auth::AppState;
use crate::middleware::Claims;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_order_by")]
    pub order_by: String,
    #[serde(default)]
    pub direction: Direction,
}

fn default_order_by() -> String {
    ORDER_BY_CREATED_AT.to_string()
}

/// POST /collections/{collection}/documents: stores the document, assigns
/// its id and wakes every subscriber of the collection.
pub async fn add_document(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(doc): Json<NewDocument>,
) -> Result<impl IntoResponse, StatusCode> {
    if collection.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if doc.author_id != claims.sub.to_string() {
        warn!("{} tried to post as {}", claims.sub, doc.author_id);
        return Err(StatusCode::FORBIDDEN);
    }

    // Run blocking DB insert off the async runtime
    let db = state.db.clone();
    let coll = collection.clone();
    let id = tokio::task::spawn_blocking(move || db.insert_document(&coll, &doc))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("DB insert_document error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    debug!("Document {} added to '{}'", id, collection);
    state.dispatcher.notify_changed(&collection);

    Ok((StatusCode::CREATED, Json(AddDocumentResponse { id })))
}

/// GET /collections/{collection}/documents: one-shot ordered listing, the
/// same view a feed snapshot carries.
pub async fn list_documents(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(query): Query<ListQuery>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let feed_query = FeedQuery {
        collection,
        order_by: query.order_by,
        direction: query.direction,
    };
    validate_query(&feed_query).map_err(|_| StatusCode::BAD_REQUEST)?;

    let db = state.db.clone();
    let messages = tokio::task::spawn_blocking(move || {
        db.get_messages(&feed_query.collection, feed_query.direction)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("DB get_messages error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(messages))
}

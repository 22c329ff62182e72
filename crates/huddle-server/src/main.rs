mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use huddle_api::auth::{self, AppState, AppStateInner};
use huddle_api::blobs::{self, MAX_BLOB_SIZE};
use huddle_api::documents;
use huddle_api::middleware::require_auth;
use huddle_db::Database;
use huddle_gateway::connection;
use huddle_gateway::dispatcher::Dispatcher;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,huddle_api=debug,huddle_gateway=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        dispatcher,
        blob_dir: config.blob_dir.clone(),
        public_url: config.public_url.clone(),
    });

    // Routes
    let auth_layer = middleware::from_fn_with_state(state.clone(), require_auth);

    let public_routes = Router::new()
        .route("/auth/anonymous", post(auth::sign_in_anonymously))
        .route("/feed", get(feed_upgrade))
        .route("/health", get(health));

    let protected_routes = Router::new()
        .route(
            "/collections/{collection}/documents",
            get(documents::list_documents).post(documents::add_document),
        )
        .layer(auth_layer.clone());

    // Downloads are public so the URL alone is enough to fetch an image
    let blob_routes = Router::new().route(
        "/blobs/{key}",
        get(blobs::download_blob).merge(
            put(blobs::upload_blob)
                .layer(DefaultBodyLimit::max(MAX_BLOB_SIZE))
                .route_layer(auth_layer),
        ),
    );

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(blob_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Huddle server listening on {}", addr);
    info!("Blob storage: {} (public base {})", config.blob_dir.display(), config.public_url);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn feed_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher.clone(),
            state.db.clone(),
            state.jwt_secret.clone(),
        )
    })
}

async fn health() -> &'static str {
    "ok"
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}

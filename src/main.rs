use std::sync::Arc;

use axum::{routing::get, Router};
use timeline_chat_service::{
    auth::{ConnectionAuthenticator, JwtVerifier},
    config::{Config, StoreBackend},
    db, error, logging, migrations,
    services::{MessagingService, TimelineClient},
    state::AppState,
    store::{ConversationStore, MemoryConversationStore, PgConversationStore},
    websocket::{handlers::ws_handler, RoomRegistry},
};

async fn health() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(Config::from_env()?);

    let store: Arc<dyn ConversationStore> = match cfg.store {
        StoreBackend::Postgres => {
            let pool = db::init_pool(&cfg.database_url)
                .await
                .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
            migrations::run_all(&pool)
                .await
                .map_err(|e| error::AppError::StartServer(format!("migrations: {e}")))?;
            Arc::new(PgConversationStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("running with the in-memory store; nothing will be persisted");
            Arc::new(MemoryConversationStore::new())
        }
    };

    let timeline_client = Arc::new(TimelineClient::new(&cfg.timeline_service_url));

    let jwt = JwtVerifier::from_rsa_pem(cfg.jwt_public_key_pem.as_bytes())?;
    let authenticator = Arc::new(ConnectionAuthenticator::new(jwt, timeline_client.clone()));

    let service = Arc::new(MessagingService::new(
        store,
        cfg.preload_message_limit,
        cfg.max_message_length,
    ));

    let state = AppState {
        config: cfg.clone(),
        service,
        directory: timeline_client,
        authenticator,
        registry: RoomRegistry::new(),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting timeline-chat-service");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;

    Ok(())
}

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::Method,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use athlinked_shared::constants::{
    DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT, PROTOCOL_VERSION, WS_PATH,
};
use athlinked_shared::protocol::ConversationSummary;
use athlinked_shared::{ConversationId, UserId};
use athlinked_store::{Message, MessagingStore};

use crate::config::ServerConfig;
use crate::delivery::DeliveryEngine;
use crate::error::ServerError;
use crate::gateway::ws_handler;
use crate::rate_limit::{rate_limit_middleware, IpRateLimiter};
use crate::registry::ConnectionRegistry;
use crate::sync::store_call;

#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub engine: DeliveryEngine,
    pub store: Arc<dyn MessagingStore>,
    pub rate_limiter: IpRateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    // One parameter name per position: `{id}` is a user id on the list
    // route and a conversation id below it.
    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route(WS_PATH, get(ws_handler))
        .route("/conversations/{id}", get(list_conversations))
        .route("/conversations/{id}/messages", get(list_messages))
        .route("/conversations/{id}/read", post(mark_read))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    protocol: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    online_users: usize,
    connections: usize,
}

#[derive(Serialize)]
struct ConversationListResponse {
    conversations: Vec<ConversationSummary>,
    total_unread: u32,
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
    before: Option<i64>,
}

#[derive(Serialize)]
struct HistoryResponse {
    conversation_id: ConversationId,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct ReadRequest {
    user_id: String,
}

#[derive(Serialize)]
struct ReadResponse {
    cleared: u32,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        protocol: PROTOCOL_VERSION,
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        online_users: state.registry.online_user_count().await,
        connections: state.registry.connection_count().await,
    })
}

/// Conversation list of one user, most recent first.
async fn list_conversations(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationListResponse>, ServerError> {
    let user = UserId::parse(&id)?;
    let (conversations, total_unread) = store_call(&state.store, move |store| {
        Ok((store.conversations_for(&user)?, store.total_unread(&user)?))
    })
    .await?;

    Ok(Json(ConversationListResponse {
        conversations,
        total_unread,
    }))
}

/// Message history, newest first. `before` pages backwards by sequence
/// number; reconnecting clients use it to catch up.
async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ServerError> {
    let conversation_id = ConversationId::parse(&id)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let conv = conversation_id.clone();
    let messages = store_call(&state.store, move |store| {
        store.messages_in(&conv, limit, query.before)
    })
    .await?;

    Ok(Json(HistoryResponse {
        conversation_id,
        messages,
    }))
}

/// REST read path: reset the counter and push the refreshed state to the
/// reader's open tabs.
async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ReadRequest>,
) -> Result<Json<ReadResponse>, ServerError> {
    let conversation_id = ConversationId::parse(&id)?;
    let reader = UserId::parse(&req.user_id)?;
    let cleared = state.engine.mark_read_as(&reader, &conversation_id).await?;
    Ok(Json(ReadResponse { cleared }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP + WebSocket server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

//! # athlinked-server
//!
//! Real-time direct messaging server for AthLinked.
//!
//! This binary provides:
//! - **WebSocket gateway** at `/ws`: clients announce their user id, send
//!   messages and acknowledge reads; the server pushes new messages,
//!   delivery receipts, conversation list updates and unread badges
//! - **Durable message store** (SQLite) that is the source of truth for
//!   history, conversation summaries and unread counters
//! - **REST API** (axum) for health checks, conversation lists, message
//!   history and the read path
//! - **Rate limiting** per client IP (HTTP) and per user (message sends)

mod api;
mod config;
mod delivery;
mod error;
mod gateway;
mod rate_limit;
mod registry;
mod sync;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use athlinked_store::{MessagingStore, SqliteStore};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::delivery::DeliveryEngine;
use crate::rate_limit::{IpRateLimiter, SendRateLimiter};
use crate::registry::ConnectionRegistry;
use crate::sync::ConversationSync;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,athlinked_server=debug,athlinked_store=info")
        }))
        .init();

    info!("Starting AthLinked messaging server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let store: Arc<dyn MessagingStore> = Arc::new(SqliteStore::open(&config.database_path)?);
    info!(path = %config.database_path.display(), "Message store opened");

    let registry = ConnectionRegistry::new();
    let sync = ConversationSync::new(registry.clone(), store.clone());
    let send_limiter = SendRateLimiter::new(config.send_rate_per_sec, config.send_burst);
    let engine = DeliveryEngine::new(
        registry.clone(),
        store.clone(),
        sync,
        send_limiter.clone(),
        config.max_message_len,
    );
    let ip_limiter = IpRateLimiter::new(config.http_rate_per_sec, config.http_burst);

    let http_addr = config.http_addr;
    let app_state = AppState {
        registry,
        engine,
        store,
        rate_limiter: ip_limiter.clone(),
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Rate limiter cleanup every 5 minutes, evicting buckets idle >10 min
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            ip_limiter.purge_stale(600.0).await;
            send_limiter.purge_stale(600.0).await;
            let ip_buckets = ip_limiter.tracked().await;
            let user_buckets = send_limiter.tracked().await;
            tracing::debug!(
                ip_buckets,
                user_buckets,
                "Rate limiter buckets purged"
            );
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server until shutdown
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

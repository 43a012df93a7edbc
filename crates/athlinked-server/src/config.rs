//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use athlinked_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_MAX_MESSAGE_LEN};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file holding conversations and messages.
    /// Env: `DATABASE_PATH`
    /// Default: `./athlinked-messages.db`
    pub database_path: PathBuf,

    /// Human-readable name reported by `/info`.
    /// Env: `INSTANCE_NAME`
    /// Default: `"AthLinked Messaging"`
    pub instance_name: String,

    /// Maximum message body length in characters.
    /// Env: `MAX_MESSAGE_LEN`
    /// Default: `4000`
    pub max_message_len: usize,

    /// Events buffered per connection before further events to that
    /// connection are dropped.
    /// Env: `OUTBOX_CAPACITY`
    /// Default: `256`
    pub outbox_capacity: usize,

    /// Sustained `send_message` rate per user (messages/second).
    /// Env: `SEND_RATE_PER_SEC`
    /// Default: `5`
    pub send_rate_per_sec: f64,

    /// Burst allowance for `send_message` per user.
    /// Env: `SEND_BURST`
    /// Default: `20`
    pub send_burst: f64,

    /// Sustained HTTP request rate per client IP.
    /// Env: `HTTP_RATE_PER_SEC`
    /// Default: `10`
    pub http_rate_per_sec: f64,

    /// HTTP burst allowance per client IP.
    /// Env: `HTTP_BURST`
    /// Default: `30`
    pub http_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./athlinked-messages.db"),
            instance_name: "AthLinked Messaging".to_string(),
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            outbox_capacity: 256,
            send_rate_per_sec: 5.0,
            send_burst: 20.0,
            http_rate_per_sec: 10.0,
            http_burst: 30.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Invalid values are
    /// logged and replaced by the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            config.http_addr = parse_or_default("HTTP_ADDR", &addr, config.http_addr);
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = PathBuf::from(path);
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(val) = lookup("MAX_MESSAGE_LEN") {
            config.max_message_len = positive_or_default(
                "MAX_MESSAGE_LEN",
                parse_or_default("MAX_MESSAGE_LEN", &val, config.max_message_len),
                config.max_message_len,
            );
        }

        if let Some(val) = lookup("OUTBOX_CAPACITY") {
            config.outbox_capacity = positive_or_default(
                "OUTBOX_CAPACITY",
                parse_or_default("OUTBOX_CAPACITY", &val, config.outbox_capacity),
                config.outbox_capacity,
            );
        }

        if let Some(val) = lookup("SEND_RATE_PER_SEC") {
            config.send_rate_per_sec =
                parse_or_default("SEND_RATE_PER_SEC", &val, config.send_rate_per_sec);
        }

        if let Some(val) = lookup("SEND_BURST") {
            config.send_burst = parse_or_default("SEND_BURST", &val, config.send_burst);
        }

        if let Some(val) = lookup("HTTP_RATE_PER_SEC") {
            config.http_rate_per_sec =
                parse_or_default("HTTP_RATE_PER_SEC", &val, config.http_rate_per_sec);
        }

        if let Some(val) = lookup("HTTP_BURST") {
            config.http_burst = parse_or_default("HTTP_BURST", &val, config.http_burst);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_or_default<T: FromStr + Copy>(key: &str, raw: &str, default: T) -> T {
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid configuration value, using default");
            default
        }
    }
}

fn positive_or_default(key: &str, value: usize, default: usize) -> usize {
    if value == 0 {
        tracing::warn!(key, "Configuration value must be positive, using default");
        default
    } else {
        value
    }
}

//! Structured error kinds shared by every library-layer module (§7).
//!
//! Orchestrators (warmup service, control handlers, `main`) work in
//! `anyhow::Result` and decide whether to record-and-continue or abort;
//! everything below that layer returns `LivermoreError` so the activity
//! stream and perf log can attach real context instead of a bare string.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LivermoreError {
    #[error("transient error talking to {exchange}: {source}")]
    Transient {
        exchange: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("rate limited by {exchange}, retry_after={retry_after_ms:?}ms")]
    RateLimited {
        exchange: String,
        retry_after_ms: Option<u64>,
    },

    #[error("{exchange} refused service for geo reasons (HTTP 451)")]
    GeoRestricted { exchange: String },

    #[error("authentication rejected by {exchange}")]
    AuthFailed { exchange: String },

    #[error("invalid FSM transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::registry::fsm::ConnectionState,
        to: crate::registry::fsm::ConnectionState,
    },

    #[error("cache entry at key {key} failed to parse, treating as missing")]
    CacheCorrupt { key: String },

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, LivermoreError>;

//! Postgres schema access (§6). Plain row structs plus hand-written
//! queries via `sqlx`'s runtime query builder — matching the teacher's
//! style rather than the compile-time `query!` macro, since this crate
//! has no fixed dev database to check against at build time.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{LivermoreError, Result};

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ExchangeRow {
    pub id: i32,
    pub name: String,
    pub display_name: String,
    pub ws_url: String,
    pub rest_url: String,
    pub supported_timeframes: Vec<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExchangeSymbolRow {
    pub exchange_id: i32,
    pub symbol: String,
    pub volume_24h: Option<Decimal>,
    pub market_cap: Option<Decimal>,
    pub rank: Option<i32>,
    pub liquidity_score: Option<f64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AlertHistoryRow {
    pub id: i64,
    pub exchange_id: i32,
    pub symbol: String,
    pub timeframe: String,
    pub alert_type: String,
    pub triggered_at: DateTime<Utc>,
    pub triggered_at_epoch: i64,
    pub price: Decimal,
    pub trigger_value: f64,
    pub trigger_label: String,
    pub previous_label: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKeyRow {
    pub id: i32,
    pub user_id: i32,
    pub key_hash: String,
    pub is_active: bool,
}

pub async fn fetch_active_exchanges(pool: &sqlx::PgPool) -> Result<Vec<ExchangeRow>> {
    sqlx::query_as::<_, ExchangeRow>(
        "SELECT id, name, display_name, ws_url, rest_url, supported_timeframes, is_active
         FROM exchanges WHERE is_active = true ORDER BY id",
    )
    .fetch_all(pool)
    .await
    .map_err(LivermoreError::Postgres)
}

pub async fn fetch_exchange_by_name(pool: &sqlx::PgPool, name: &str) -> Result<Option<ExchangeRow>> {
    sqlx::query_as::<_, ExchangeRow>(
        "SELECT id, name, display_name, ws_url, rest_url, supported_timeframes, is_active
         FROM exchanges WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await
    .map_err(LivermoreError::Postgres)
}

pub async fn fetch_symbols(pool: &sqlx::PgPool, exchange_id: i32) -> Result<Vec<ExchangeSymbolRow>> {
    sqlx::query_as::<_, ExchangeSymbolRow>(
        "SELECT exchange_id, symbol, volume_24h, market_cap, rank, liquidity_score
         FROM exchange_symbols WHERE exchange_id = $1 ORDER BY rank NULLS LAST",
    )
    .bind(exchange_id)
    .fetch_all(pool)
    .await
    .map_err(LivermoreError::Postgres)
}

/// Cursor-paginated by descending `id` per §4.M (avoids timestamp
/// collisions between near-simultaneous alerts).
pub async fn fetch_alerts(
    pool: &sqlx::PgPool,
    exchange_id: i32,
    symbol: Option<&str>,
    before_id: Option<i64>,
    limit: i64,
) -> Result<Vec<AlertHistoryRow>> {
    let rows = sqlx::query_as::<_, AlertHistoryRow>(
        "SELECT id, exchange_id, symbol, timeframe, alert_type, triggered_at, triggered_at_epoch,
                price, trigger_value, trigger_label, previous_label
         FROM alert_history
         WHERE exchange_id = $1
           AND ($2::text IS NULL OR symbol = $2)
           AND ($3::bigint IS NULL OR id < $3)
         ORDER BY id DESC
         LIMIT $4",
    )
    .bind(exchange_id)
    .bind(symbol)
    .bind(before_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(LivermoreError::Postgres)?;
    Ok(rows)
}

pub async fn fetch_api_key(pool: &sqlx::PgPool, key_hash: &str) -> Result<Option<ApiKeyRow>> {
    sqlx::query_as::<_, ApiKeyRow>(
        "SELECT id, user_id, key_hash, is_active FROM api_keys WHERE key_hash = $1 AND is_active = true",
    )
    .bind(key_hash)
    .fetch_optional(pool)
    .await
    .map_err(LivermoreError::Postgres)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liquidity_tier_boundaries_match_spec_thresholds() {
        // Documents the §4.M mapping used by the public symbols handler;
        // exercised end to end in api::public's tests.
        assert!(crate::api::public::liquidity_tier(0.6) == "high");
        assert!(crate::api::public::liquidity_tier(0.3) == "medium");
        assert!(crate::api::public::liquidity_tier(0.29) == "low");
    }
}

//! Public Read API handlers (§4.M). Every handler builds a response
//! struct naming exactly the fields it's allowed to expose — internal
//! indicator type strings and table layouts never leak into a body.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use super::envelope::{decode_cursor, encode_cursor, ApiError, Envelope};
use crate::cache::keys;
use crate::db;
use crate::redis_handle::RedisHandle;
use crate::types::{IndicatorValue, Timeframe};

const DEFAULT_PAGE_SIZE: i64 = 100;
const MAX_PAGE_SIZE: i64 = 500;
const SIGNAL_TIMEFRAMES: [Timeframe; 4] = [Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::D1];

pub struct AppState {
    pub redis: RedisHandle,
    pub pg: sqlx::PgPool,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

fn page_size(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

async fn resolve_exchange_id(pg: &sqlx::PgPool, exchange: &str) -> Result<i32, ApiError> {
    db::fetch_exchange_by_name(pg, exchange)
        .await?
        .map(|row| row.id)
        .ok_or_else(|| ApiError::not_found(format!("unknown exchange '{exchange}'")))
}

#[derive(Debug, Serialize)]
pub struct CandleOut {
    pub timestamp_ms: i64,
    pub open: rust_decimal::Decimal,
    pub high: rust_decimal::Decimal,
    pub low: rust_decimal::Decimal,
    pub close: rust_decimal::Decimal,
    pub volume: rust_decimal::Decimal,
}

pub async fn get_candles(
    State(state): State<Arc<AppState>>,
    Path((exchange, symbol, timeframe)): Path<(String, String, String)>,
    Query(page): Query<PageParams>,
) -> Result<Json<Envelope<Vec<CandleOut>>>, ApiError> {
    let exchange_id = resolve_exchange_id(&state.pg, &exchange).await?;
    let timeframe = Timeframe::parse(&timeframe).ok_or_else(|| ApiError::bad_request("invalid timeframe"))?;
    let limit = page_size(page.limit);

    let writer = state.redis.writer();
    let max_ts: i64 = match page.cursor.as_deref().and_then(decode_cursor) {
        Some(ts) => ts,
        None => i64::MAX,
    };

    let candles = writer
        .candles_in_range(exchange_id, &symbol, timeframe, i64::MIN, max_ts, limit as isize + 1)
        .await?;

    let has_more = candles.len() as i64 > limit;
    let page_candles: Vec<_> = candles.into_iter().take(limit as usize).collect();
    let next_cursor = if has_more { page_candles.last().map(|c| encode_cursor(c.timestamp_ms)) } else { None };

    let out: Vec<CandleOut> = page_candles
        .into_iter()
        .map(|c| CandleOut { timestamp_ms: c.timestamp_ms, open: c.open, high: c.high, low: c.low, close: c.close, volume: c.volume })
        .collect();

    let count = out.len();
    Ok(Json(Envelope::ok(out, count, next_cursor, has_more)))
}

/// Maps the internal `[0,1]` liquidity score to the public tier (§4.M).
pub fn liquidity_tier(score: f64) -> &'static str {
    if score >= 0.6 {
        "high"
    } else if score >= 0.3 {
        "medium"
    } else {
        "low"
    }
}

#[derive(Debug, Serialize)]
pub struct SymbolOut {
    pub exchange: String,
    pub symbol: String,
    pub liquidity: &'static str,
}

pub async fn get_symbols(State(state): State<Arc<AppState>>) -> Result<Json<Envelope<Vec<SymbolOut>>>, ApiError> {
    let exchanges = db::fetch_active_exchanges(&state.pg).await?;
    let mut out = Vec::new();
    for exchange in &exchanges {
        let symbols = db::fetch_symbols(&state.pg, exchange.id).await?;
        for s in symbols {
            out.push(SymbolOut {
                exchange: exchange.name.clone(),
                symbol: s.symbol,
                liquidity: liquidity_tier(s.liquidity_score.unwrap_or(0.0)),
            });
        }
    }
    let count = out.len();
    Ok(Json(Envelope::ok(out, count, None, false)))
}

fn stage_to_direction(stage: &str) -> &'static str {
    match stage {
        "rising" => "bullish",
        "falling" => "bearish",
        _ => "neutral",
    }
}

fn strength_from_abs(value: f64) -> &'static str {
    let value = value.abs();
    if value < 30.0 {
        "weak"
    } else if value < 80.0 {
        "moderate"
    } else if value < 150.0 {
        "strong"
    } else {
        "extreme"
    }
}

#[derive(Debug, Serialize)]
pub struct SignalOut {
    #[serde(rename = "type")]
    pub signal_type: &'static str,
    pub timeframe: &'static str,
    pub direction: &'static str,
    pub strength: &'static str,
}

pub async fn get_signals(
    State(state): State<Arc<AppState>>,
    Path((exchange, symbol)): Path<(String, String)>,
) -> Result<Json<Envelope<Vec<SignalOut>>>, ApiError> {
    let exchange_id = resolve_exchange_id(&state.pg, &exchange).await?;
    let mut conn = state.redis.connection();
    let mut out = Vec::new();

    for timeframe in SIGNAL_TIMEFRAMES {
        let key = keys::indicator(exchange_id, &symbol, timeframe, "momentum_stage");
        let raw: Option<String> = conn.get(&key).await?;
        let Some(raw) = raw else { continue };
        let Ok(value) = serde_json::from_str::<IndicatorValue>(&raw) else { continue };
        if !value.params.seeded {
            continue;
        }
        let raw_value = value.value.get("raw_value").copied().unwrap_or(0.0);
        out.push(SignalOut {
            signal_type: "momentum_signal",
            timeframe: timeframe.as_str(),
            direction: stage_to_direction(&value.params.stage),
            strength: strength_from_abs(raw_value),
        });
    }

    let count = out.len();
    Ok(Json(Envelope::ok(out, count, None, false)))
}

/// `trigger_label` parsing rules (§4.M).
fn trigger_label_direction(label: &str) -> &'static str {
    if label == "reversal_oversold" {
        return "bullish";
    }
    if label == "reversal_overbought" {
        return "bearish";
    }
    if let Some(n_str) = label.strip_prefix("level_") {
        if let Ok(n) = n_str.parse::<i64>() {
            return if n >= 0 { "bullish" } else { "bearish" };
        }
    }
    "bearish"
}

#[derive(Debug, Serialize)]
pub struct AlertOut {
    pub signal_type: &'static str,
    pub exchange: String,
    pub symbol: String,
    pub timeframe: String,
    pub price: rust_decimal::Decimal,
    pub direction: &'static str,
    pub strength: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct AlertParams {
    pub symbol: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

pub async fn get_alerts(
    State(state): State<Arc<AppState>>,
    Path(exchange): Path<String>,
    Query(page): Query<AlertParams>,
) -> Result<Json<Envelope<Vec<AlertOut>>>, ApiError> {
    let exchange_id = resolve_exchange_id(&state.pg, &exchange).await?;
    let limit = page_size(page.limit);
    let before_id = page.cursor.as_deref().and_then(decode_cursor);

    let rows = db::fetch_alerts(&state.pg, exchange_id, page.symbol.as_deref(), before_id, limit + 1).await?;
    let has_more = rows.len() as i64 > limit;
    let page_rows: Vec<_> = rows.into_iter().take(limit as usize).collect();
    let next_cursor = if has_more { page_rows.last().map(|r| encode_cursor(r.id)) } else { None };

    let out: Vec<AlertOut> = page_rows
        .into_iter()
        .map(|r| AlertOut {
            signal_type: "momentum_signal",
            exchange: exchange.clone(),
            symbol: r.symbol,
            timeframe: r.timeframe,
            price: r.price,
            direction: trigger_label_direction(&r.trigger_label),
            strength: strength_from_abs(r.trigger_value),
        })
        .collect();

    let count = out.len();
    Ok(Json(Envelope::ok(out, count, next_cursor, has_more)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liquidity_tier_thresholds() {
        assert_eq!(liquidity_tier(0.9), "high");
        assert_eq!(liquidity_tier(0.6), "high");
        assert_eq!(liquidity_tier(0.3), "medium");
        assert_eq!(liquidity_tier(0.1), "low");
    }

    #[test]
    fn strength_buckets() {
        assert_eq!(strength_from_abs(10.0), "weak");
        assert_eq!(strength_from_abs(50.0), "moderate");
        assert_eq!(strength_from_abs(100.0), "strong");
        assert_eq!(strength_from_abs(200.0), "extreme");
    }

    #[test]
    fn trigger_label_direction_rules() {
        assert_eq!(trigger_label_direction("reversal_oversold"), "bullish");
        assert_eq!(trigger_label_direction("reversal_overbought"), "bearish");
        assert_eq!(trigger_label_direction("level_2"), "bullish");
        assert_eq!(trigger_label_direction("level_-1"), "bearish");
        assert_eq!(trigger_label_direction("something_else"), "bearish");
    }
}

//! Versioned cache writers (§4.C). `add_candle_if_newer` is the sole path
//! by which a candle enters the cache, whether it arrived from the
//! streaming adapter or a REST backfill — idempotent and monotonic per
//! §8 invariant 2.
//!
//! Grounded in the teacher's `flush_batch` (pipeline.rs): a small
//! connection-scoped helper that knows exactly one table/key shape and
//! nothing else about the caller.

use redis::AsyncCommands;
use tracing::{debug, instrument};

use crate::cache::keys;
use crate::error::{LivermoreError, Result};
use crate::types::Candle;

/// Default number of most-recent elements kept per candle sorted set
/// (§4.C step 4).
pub const DEFAULT_TRIM_DEPTH: isize = 1000;

#[derive(Clone)]
pub struct CacheWriter {
    conn: redis::aio::ConnectionManager,
}

impl CacheWriter {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }

    /// Implements the four steps of §4.C's candle write contract.
    /// Returns `true` if the write was applied, `false` if a
    /// higher-or-equal sequence number already occupied that timestamp.
    #[instrument(skip(self, candle), fields(exchange_id = candle.exchange_id, symbol = %candle.symbol, timeframe = candle.timeframe.as_str()))]
    pub async fn add_candle_if_newer(&self, candle: &Candle, is_close: bool) -> Result<bool> {
        let key = keys::candles(candle.exchange_id, &candle.symbol, candle.timeframe);
        let mut conn = self.conn.clone();

        let existing: Vec<String> = conn
            .zrangebyscore(&key, candle.timestamp_ms, candle.timestamp_ms)
            .await?;

        let existing_seq = match existing.first() {
            Some(raw) => match serde_json::from_str::<Candle>(raw) {
                Ok(c) => Some(c.sequence_num),
                Err(_) => {
                    // Corrupt member: treat as missing per §7, but remove it
                    // so the next write isn't blocked by garbage.
                    let _: () = conn.zrem(&key, raw).await?;
                    None
                }
            },
            None => None,
        };

        if let Some(seq) = existing_seq {
            if candle.sequence_num <= seq {
                debug!(existing_seq = seq, new_seq = candle.sequence_num, "discarding stale candle write");
                return Ok(false);
            }
            // Remove the stale member before adding the newer one so the
            // score keeps exactly one member (§8 invariant 1).
            if let Some(raw) = existing.first() {
                let _: () = conn.zrem(&key, raw).await?;
            }
        }

        let payload = serde_json::to_string(candle)?;
        let _: () = conn.zadd(&key, payload, candle.timestamp_ms).await?;
        let _: () = conn
            .zremrangebyrank(&key, 0, -(DEFAULT_TRIM_DEPTH + 1))
            .await?;

        if is_close {
            self.publish_close(candle).await?;
        }

        Ok(true)
    }

    async fn publish_close(&self, candle: &Candle) -> Result<()> {
        let channel = keys::channel_candle_close(candle.exchange_id, &candle.symbol, candle.timeframe);
        let payload = serde_json::to_string(&serde_json::json!({ "candle": candle }))?;
        let mut conn = self.conn.clone();
        let _: () = conn.publish(&channel, payload).await?;
        Ok(())
    }

    pub async fn write_ticker(&self, exchange_id: i32, symbol: &str, ticker: &crate::types::Ticker) -> Result<()> {
        let key = keys::ticker(exchange_id, symbol);
        let payload = serde_json::to_string(ticker)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set(&key, payload).await?;
        Ok(())
    }

    /// Newest score (timestamp_ms) in a candle sorted set, if any.
    pub async fn newest_timestamp_ms(&self, exchange_id: i32, symbol: &str, timeframe: crate::types::Timeframe) -> Result<Option<i64>> {
        let key = keys::candles(exchange_id, symbol, timeframe);
        let mut conn = self.conn.clone();
        let members: Vec<(String, f64)> = conn.zrevrange_withscores(&key, 0, 0).await?;
        Ok(members.first().map(|(_, score)| *score as i64))
    }

    pub async fn cached_count(&self, exchange_id: i32, symbol: &str, timeframe: crate::types::Timeframe) -> Result<u32> {
        let key = keys::candles(exchange_id, symbol, timeframe);
        let mut conn = self.conn.clone();
        let count: u64 = conn.zcard(&key).await?;
        Ok(count as u32)
    }

    /// The most recent `limit` candles, oldest first — the shape the
    /// derived-value calculator and the public candles endpoint both
    /// want (§4.I, §4.M).
    pub async fn recent_candles(
        &self,
        exchange_id: i32,
        symbol: &str,
        timeframe: crate::types::Timeframe,
        limit: isize,
    ) -> Result<Vec<Candle>> {
        let key = keys::candles(exchange_id, symbol, timeframe);
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.zrevrange(&key, 0, limit - 1).await?;
        let mut candles: Vec<Candle> = raw
            .iter()
            .filter_map(|s| serde_json::from_str(s).ok())
            .collect();
        candles.reverse();
        Ok(candles)
    }

    /// Candles between two timestamps (inclusive), used by the public
    /// candles endpoint's cursor pagination (§4.M).
    pub async fn candles_in_range(
        &self,
        exchange_id: i32,
        symbol: &str,
        timeframe: crate::types::Timeframe,
        min_ts: i64,
        max_ts: i64,
        limit: isize,
    ) -> Result<Vec<Candle>> {
        let key = keys::candles(exchange_id, symbol, timeframe);
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .zrevrangebyscore_limit(&key, max_ts, min_ts, 0, limit)
            .await?;
        Ok(raw.iter().filter_map(|s| serde_json::from_str(s).ok()).collect())
    }

    /// Cluster-safe bulk delete for the warmup dump phase (§4.D): SCAN + DEL
    /// in batches, never KEYS, so a cluster deployment never blocks a slot.
    pub async fn dump_candles(&self, exchange_id: i32) -> Result<u64> {
        let pattern = keys::candles_scan_pattern(exchange_id);
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut deleted = 0u64;
        loop {
            let (next_cursor, keys_batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(LivermoreError::Redis)?;

            if !keys_batch.is_empty() {
                let count: u64 = conn.del(&keys_batch).await?;
                deleted += count;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn sample_candle(seq: i64) -> Candle {
        Candle {
            exchange_id: 1,
            symbol: "BTC-USD".into(),
            timeframe: crate::types::Timeframe::M5,
            timestamp_ms: 1_000,
            open: dec!(100),
            high: dec!(110),
            low: dec!(90),
            close: dec!(105),
            volume: dec!(1.5),
            sequence_num: seq,
        }
    }

    #[test]
    fn candle_invariant_holds_for_sample() {
        let c = sample_candle(1);
        assert!(c.is_valid());
        let _ = Utc::now();
    }
}

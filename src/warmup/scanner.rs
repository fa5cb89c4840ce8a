//! Candle-Status Scanner (§4.E). Given a symbol universe, determines per
//! (symbol,timeframe) whether the cache is sufficient and fresh, using
//! the sentinel as a cheap proxy to avoid a full per-symbol sweep when
//! the whole pipeline for a timeframe is already known-good or
//! known-bad.

use chrono::Utc;

use crate::error::Result;
use crate::redis_handle::RedisHandle;
use crate::types::{ScanReason, Timeframe, WarmupMode};

/// Minimum cached candles needed before the derived-value calculator can
/// produce a seeded indicator (§4.E).
pub const MIN_INDICATOR_CANDLES: u32 = 52;

#[derive(Debug, Clone)]
pub struct ScanPairResult {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub cached_count: u32,
    pub newest_candle_age_ms: Option<i64>,
    pub sufficient: bool,
    pub reason: ScanReason,
}

fn full_refresh_scan(symbols: &[String], timeframes: &[Timeframe]) -> Vec<ScanPairResult> {
    let mut results = Vec::with_capacity(symbols.len() * timeframes.len());
    for symbol in symbols {
        for &timeframe in timeframes {
            results.push(ScanPairResult {
                symbol: symbol.clone(),
                timeframe,
                cached_count: 0,
                newest_candle_age_ms: None,
                sufficient: false,
                reason: ScanReason::Empty,
            });
        }
    }
    results
}

pub struct CandleStatusScanner {
    redis: RedisHandle,
}

impl CandleStatusScanner {
    pub fn new(redis: RedisHandle) -> Self {
        Self { redis }
    }

    pub async fn scan(
        &self,
        exchange_id: i32,
        symbols: &[String],
        sentinel_symbol: &str,
        timeframes: &[Timeframe],
        mode: WarmupMode,
    ) -> Result<Vec<ScanPairResult>> {
        match mode {
            WarmupMode::FullRefresh => Ok(full_refresh_scan(symbols, timeframes)),
            WarmupMode::Targeted => self.tiered_scan(exchange_id, symbols, sentinel_symbol, timeframes).await,
        }
    }

    async fn tiered_scan(
        &self,
        exchange_id: i32,
        symbols: &[String],
        sentinel_symbol: &str,
        timeframes: &[Timeframe],
    ) -> Result<Vec<ScanPairResult>> {
        let mut results = Vec::with_capacity(symbols.len() * timeframes.len());
        let ordered: Vec<Timeframe> = Timeframe::TIERED_ORDER
            .into_iter()
            .filter(|tf| timeframes.contains(tf))
            .collect();

        for timeframe in ordered {
            let sentinel_result = self.check_pair(exchange_id, sentinel_symbol, timeframe).await?;
            let sentinel_ok = sentinel_result.sufficient;

            for symbol in symbols {
                if symbol == sentinel_symbol {
                    results.push(sentinel_result.clone());
                    continue;
                }

                if sentinel_ok {
                    results.push(self.check_pair(exchange_id, symbol, timeframe).await?);
                } else {
                    // A failed sentinel means the pipeline wasn't producing
                    // this timeframe at all — no per-symbol query needed.
                    results.push(ScanPairResult {
                        symbol: symbol.clone(),
                        timeframe,
                        cached_count: 0,
                        newest_candle_age_ms: None,
                        sufficient: false,
                        reason: sentinel_result.reason,
                    });
                }
            }
        }

        Ok(results)
    }

    async fn check_pair(&self, exchange_id: i32, symbol: &str, timeframe: Timeframe) -> Result<ScanPairResult> {
        let writer = self.redis.writer();
        let cached_count = writer.cached_count(exchange_id, symbol, timeframe).await?;
        let newest = writer.newest_timestamp_ms(exchange_id, symbol, timeframe).await?;

        if cached_count < MIN_INDICATOR_CANDLES {
            return Ok(ScanPairResult {
                symbol: symbol.to_string(),
                timeframe,
                cached_count,
                newest_candle_age_ms: newest.map(|ts| Utc::now().timestamp_millis() - ts),
                sufficient: false,
                reason: if cached_count == 0 { ScanReason::Empty } else { ScanReason::LowCount },
            });
        }

        let age_ms = match newest {
            Some(ts) => Utc::now().timestamp_millis() - ts,
            None => {
                return Ok(ScanPairResult {
                    symbol: symbol.to_string(),
                    timeframe,
                    cached_count,
                    newest_candle_age_ms: None,
                    sufficient: false,
                    reason: ScanReason::Empty,
                });
            }
        };

        let sufficient = age_ms <= timeframe.staleness_threshold_ms();
        Ok(ScanPairResult {
            symbol: symbol.to_string(),
            timeframe,
            cached_count,
            newest_candle_age_ms: Some(age_ms),
            sufficient,
            reason: if sufficient { ScanReason::Ok } else { ScanReason::Stale },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_refresh_marks_every_pair_empty() {
        let symbols = vec!["BTC-USD".to_string(), "ETH-USD".to_string()];
        let timeframes = [Timeframe::M5, Timeframe::H1];
        let results = full_refresh_scan(&symbols, &timeframes);
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| !r.sufficient && r.reason == ScanReason::Empty));
    }
}

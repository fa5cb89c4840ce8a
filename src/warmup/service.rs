//! Smart Warmup Service (§4.G): orchestrates assess → dump → scan →
//! build → fetch → complete for one exchange, run once at boot and
//! again on demand via the control channel.

use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use redis::AsyncCommands;
use tracing::{error, info};

use super::schedule::{pending_entries, WarmupScheduleBuilder};
use super::scanner::CandleStatusScanner;
use super::trust::CacheTrustAssessor;
use crate::cache::keys;
use crate::error::Result;
use crate::exchange::ExchangeAdapter;
use crate::redis_handle::RedisHandle;
use crate::types::{Timeframe, WarmupFailure, WarmupMode, WarmupStats, WarmupStatus};

const FETCH_BATCH_SIZE: usize = 5;
const INTER_BATCH_DELAY: Duration = Duration::from_secs(1);

pub struct SmartWarmupService {
    redis: RedisHandle,
    trust: CacheTrustAssessor,
    scanner: CandleStatusScanner,
    schedule_builder: WarmupScheduleBuilder,
}

impl SmartWarmupService {
    pub fn new(redis: RedisHandle) -> Self {
        Self {
            trust: CacheTrustAssessor::new(redis.clone()),
            scanner: CandleStatusScanner::new(redis.clone()),
            schedule_builder: WarmupScheduleBuilder::new(redis.clone()),
            redis,
        }
    }

    pub async fn run(
        &self,
        exchange_id: i32,
        adapter: &dyn ExchangeAdapter,
        symbols: &[String],
        sentinel_symbol: &str,
        timeframes: &[Timeframe],
    ) -> Result<()> {
        self.write_status(exchange_id, WarmupStatus::Assessing, WarmupMode::Targeted, 0, 0)
            .await?;

        let decision = self.trust.assess(exchange_id, sentinel_symbol).await?;
        info!(exchange_id, mode = ?decision.mode, reason = decision.reason, "warmup trust decision");

        if decision.mode == WarmupMode::FullRefresh {
            self.write_status(exchange_id, WarmupStatus::Dumping, decision.mode, 0, 0)
                .await?;
            let writer = self.redis.writer();
            let removed = writer.dump_candles(exchange_id).await?;
            info!(exchange_id, removed, "dumped stale candle cache before full refresh");
        }

        self.write_status(exchange_id, WarmupStatus::Scanning, decision.mode, 0, 0)
            .await?;
        let scan_results = self
            .scanner
            .scan(exchange_id, symbols, sentinel_symbol, timeframes, decision.mode)
            .await?;

        let schedule = WarmupScheduleBuilder::build(decision.mode, &scan_results);
        self.schedule_builder.persist(exchange_id, &schedule).await?;
        info!(
            exchange_id,
            total_pairs = schedule.total_pairs,
            needs_fetching = schedule.needs_fetching,
            "warmup schedule built"
        );

        if schedule.needs_fetching == 0 {
            // Warm-restart optimization: every pair already sufficient,
            // nothing to fetch at all.
            self.write_status(exchange_id, WarmupStatus::Complete, decision.mode, schedule.total_pairs, schedule.total_pairs)
                .await?;
            return Ok(());
        }

        self.write_status(exchange_id, WarmupStatus::Fetching, decision.mode, 0, schedule.needs_fetching)
            .await?;

        let pending = pending_entries(&schedule);
        let writer = self.redis.writer();
        let mut completed: u32 = 0;
        let mut failures: Vec<WarmupFailure> = Vec::new();
        let started_at = Instant::now();

        let batches: Vec<_> = pending.chunks(FETCH_BATCH_SIZE).collect();
        for (batch_idx, batch) in batches.iter().enumerate() {
            let current = batch.first().map(|e| (e.symbol.clone(), e.timeframe));
            let next = batches.get(batch_idx + 1).and_then(|b| b.first()).map(|e| (e.symbol.clone(), e.timeframe));

            // §4.G step 5: "each batch issues the REST calls concurrently" —
            // fan the whole batch out with join_all instead of awaiting one
            // fetch at a time.
            let outcomes = join_all(batch.iter().map(|entry| {
                let writer = writer.clone();
                let adapter = adapter;
                async move {
                    match adapter.fetch_recent_candles(&entry.symbol, entry.timeframe, entry.target_count).await {
                        Ok(candles) => {
                            for candle in &candles {
                                if let Err(e) = writer.add_candle_if_newer(candle, false).await {
                                    error!(exchange_id, symbol = %entry.symbol, error = %e, "failed writing backfilled candle");
                                }
                            }
                            Ok(())
                        }
                        Err(e) => {
                            error!(exchange_id, symbol = %entry.symbol, timeframe = ?entry.timeframe, error = %e, "warmup fetch failed");
                            Err(WarmupFailure { symbol: entry.symbol.clone(), timeframe: entry.timeframe, error: e.to_string() })
                        }
                    }
                }
            }))
            .await;

            for outcome in outcomes {
                match outcome {
                    Ok(()) => completed += 1,
                    Err(failure) => failures.push(failure),
                }
            }

            let eta_ms = estimate_eta_ms(started_at, completed + failures.len() as u32, schedule.needs_fetching);
            self.write_stats(
                exchange_id,
                decision.mode,
                completed,
                failures.len() as u32,
                schedule.needs_fetching,
                &failures,
                eta_ms,
                current,
                next,
            )
            .await?;

            if batch.len() == FETCH_BATCH_SIZE {
                tokio::time::sleep(INTER_BATCH_DELAY).await;
            }
        }

        self.write_status(exchange_id, WarmupStatus::Complete, decision.mode, completed, schedule.needs_fetching)
            .await?;
        Ok(())
    }

    async fn write_status(
        &self,
        exchange_id: i32,
        status: WarmupStatus,
        mode: WarmupMode,
        completed: u32,
        total: u32,
    ) -> Result<()> {
        let stats = WarmupStats {
            status,
            mode,
            completed,
            failed: 0,
            total,
            percent_complete: percent(completed, total),
            eta_ms: None,
            current: None,
            next: None,
            failures: Vec::new(),
            updated_at: Utc::now(),
        };
        self.persist_stats(exchange_id, &stats).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_stats(
        &self,
        exchange_id: i32,
        mode: WarmupMode,
        completed: u32,
        failed: u32,
        total: u32,
        failures: &[WarmupFailure],
        eta_ms: Option<u64>,
        current: Option<(String, Timeframe)>,
        next: Option<(String, Timeframe)>,
    ) -> Result<()> {
        let stats = WarmupStats {
            status: WarmupStatus::Fetching,
            mode,
            completed,
            failed,
            total,
            percent_complete: percent(completed + failed, total),
            eta_ms,
            current,
            next,
            failures: failures.to_vec(),
            updated_at: Utc::now(),
        };
        self.persist_stats(exchange_id, &stats).await
    }

    async fn persist_stats(&self, exchange_id: i32, stats: &WarmupStats) -> Result<()> {
        let mut conn = self.redis.connection();
        let body = serde_json::to_string(stats)?;
        conn.set(keys::warmup_stats(exchange_id), body).await?;
        Ok(())
    }
}

fn percent(done: u32, total: u32) -> f32 {
    if total == 0 {
        100.0
    } else {
        (done as f32 / total as f32) * 100.0
    }
}

/// ETA from the observed throughput so far (§3 `WarmupStats.eta_ms`:
/// `remaining / rate`). `None` until at least one item has completed —
/// there's no rate to extrapolate from yet.
fn estimate_eta_ms(started_at: Instant, done: u32, total: u32) -> Option<u64> {
    if done == 0 || done >= total {
        return None;
    }
    let elapsed_ms = started_at.elapsed().as_millis().max(1) as f64;
    let rate_per_ms = done as f64 / elapsed_ms;
    let remaining = (total - done) as f64;
    Some((remaining / rate_per_ms) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_is_none_before_any_completion() {
        assert_eq!(estimate_eta_ms(Instant::now(), 0, 10), None);
    }

    #[test]
    fn eta_is_none_once_done() {
        assert_eq!(estimate_eta_ms(Instant::now(), 10, 10), None);
    }

    #[test]
    fn eta_shrinks_as_more_completes() {
        let start = Instant::now() - Duration::from_millis(1000);
        let eta_early = estimate_eta_ms(start, 2, 10).unwrap();
        let eta_late = estimate_eta_ms(start, 8, 10).unwrap();
        assert!(eta_late < eta_early);
    }
}

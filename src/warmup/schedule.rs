//! Warmup Schedule Builder (§4.F). Turns scanner output into the single
//! JSON blob the read API and operators inspect to see what a warmup
//! run intends to do before it does it.

use chrono::Utc;
use redis::AsyncCommands;

use super::scanner::ScanPairResult;
use crate::cache::keys;
use crate::error::Result;
use crate::redis_handle::RedisHandle;
use crate::types::{WarmupMode, WarmupSchedule, WarmupScheduleEntry};

/// Target depth a fetch should backfill to, independent of the minimum
/// needed for indicator seeding (§4.F).
pub const TARGET_CANDLE_COUNT: u32 = 100;

pub struct WarmupScheduleBuilder {
    redis: RedisHandle,
}

impl WarmupScheduleBuilder {
    pub fn new(redis: RedisHandle) -> Self {
        Self { redis }
    }

    /// §4.F: `entries` are exactly the insufficient pairs — a fully
    /// sufficient scan persists an empty `entries` list (§8 scenario 1),
    /// not one entry per scanned pair. Pure (no Redis access needed), so
    /// it's an associated function rather than `&self` — easy to unit
    /// test without a live connection.
    pub fn build(mode: WarmupMode, scan_results: &[ScanPairResult]) -> WarmupSchedule {
        let entries: Vec<WarmupScheduleEntry> = scan_results
            .iter()
            .filter(|r| !r.sufficient)
            .map(|r| WarmupScheduleEntry {
                symbol: r.symbol.clone(),
                timeframe: r.timeframe,
                cached_count: r.cached_count,
                target_count: TARGET_CANDLE_COUNT,
                reason: r.reason,
            })
            .collect();

        let sufficient_pairs = scan_results.iter().filter(|r| r.sufficient).count() as u32;
        let needs_fetching = entries.len() as u32;

        WarmupSchedule {
            mode,
            total_pairs: scan_results.len() as u32,
            sufficient_pairs,
            needs_fetching,
            entries,
            built_at: Utc::now(),
        }
    }

    pub async fn persist(&self, exchange_id: i32, schedule: &WarmupSchedule) -> Result<()> {
        let mut conn = self.redis.connection();
        let body = serde_json::to_string(schedule)?;
        conn.set(keys::warmup_schedule(exchange_id), body).await?;
        Ok(())
    }
}

/// Entries a fetch pass actually needs to touch. `schedule.entries` is
/// already filtered to insufficient pairs by `build`, so every entry is
/// pending by construction (§4.G warm-restart optimization: sufficient
/// pairs never make it into the schedule at all).
pub fn pending_entries(schedule: &WarmupSchedule) -> Vec<&WarmupScheduleEntry> {
    schedule.entries.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ScanReason, Timeframe};

    fn result(sufficient: bool, reason: ScanReason) -> ScanPairResult {
        ScanPairResult {
            symbol: "BTC-USD".to_string(),
            timeframe: Timeframe::M5,
            cached_count: if sufficient { 100 } else { 0 },
            newest_candle_age_ms: Some(0),
            sufficient,
            reason,
        }
    }

    #[test]
    fn entries_hold_only_insufficient_pairs() {
        let results = vec![
            result(true, ScanReason::Ok),
            result(false, ScanReason::Stale),
            result(false, ScanReason::Empty),
        ];
        let schedule = WarmupScheduleBuilder::build(WarmupMode::Targeted, &results);

        assert_eq!(schedule.total_pairs, 3);
        assert_eq!(schedule.sufficient_pairs, 1);
        assert_eq!(schedule.needs_fetching, 2);
        assert_eq!(schedule.entries.len(), 2);
        assert!(schedule.entries.iter().all(|e| e.reason != ScanReason::Ok));
        assert_eq!(pending_entries(&schedule).len(), 2);
    }

    /// §8 scenario 1 (warm restart, nothing stale): every pair sufficient
    /// persists an empty `entries` list, not one entry per scanned pair.
    #[test]
    fn all_sufficient_persists_empty_entries() {
        let results = vec![result(true, ScanReason::Ok), result(true, ScanReason::Ok)];
        let schedule = WarmupScheduleBuilder::build(WarmupMode::Targeted, &results);

        assert_eq!(schedule.total_pairs, 2);
        assert_eq!(schedule.sufficient_pairs, 2);
        assert_eq!(schedule.needs_fetching, 0);
        assert!(schedule.entries.is_empty());
    }
}

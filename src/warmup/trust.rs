//! Cache-Trust Assessor (§4.D). Decides whether an exchange's candle
//! cache is trustworthy enough for a targeted top-up, or whether it
//! needs a full dump-and-rebuild.

use chrono::Utc;
use redis::AsyncCommands;
use tracing::{info, warn};

use crate::cache::keys;
use crate::error::Result;
use crate::redis_handle::RedisHandle;
use crate::types::{InstanceStatus, Timeframe, WarmupMode};

const HEARTBEAT_STALE_MS: i64 = 3 * 60 * 60 * 1000;
const SENTINEL_STALE_MS: i64 = 20 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustDecision {
    pub mode: WarmupMode,
    pub reason: &'static str,
}

pub struct CacheTrustAssessor {
    redis: RedisHandle,
}

impl CacheTrustAssessor {
    pub fn new(redis: RedisHandle) -> Self {
        Self { redis }
    }

    pub async fn assess(&self, exchange_id: i32, sentinel_symbol: &str) -> Result<TrustDecision> {
        let mut conn = self.redis.connection();
        let status_key = keys::instance_status(exchange_id);
        let raw: Option<String> = conn.get(&status_key).await?;

        match raw {
            None => {
                // A 45s-TTL key missing after a brief restart isn't evidence
                // of a bad cache — fall through to the sentinel check.
                info!(exchange_id, "status key missing, falling through to sentinel check");
            }
            Some(raw) => match serde_json::from_str::<InstanceStatus>(&raw) {
                Ok(status) => {
                    let age_ms = (Utc::now() - status.last_heartbeat).num_milliseconds();
                    if let Some(decision) = heartbeat_decision(age_ms) {
                        return Ok(decision);
                    }
                }
                Err(_) => {
                    warn!(exchange_id, "status key failed to parse, treating as missing");
                }
            },
        }

        let writer = self.redis.writer();
        let newest = writer
            .newest_timestamp_ms(exchange_id, sentinel_symbol, Timeframe::M5)
            .await?;

        Ok(sentinel_decision(newest, Utc::now().timestamp_millis()))
    }
}

/// `None` means the heartbeat is fresh enough that the caller should fall
/// through to the sentinel check; `Some` is a final decision. Pure, so it's
/// a free function rather than a method — easy to unit test without a live
/// connection.
fn heartbeat_decision(age_ms: i64) -> Option<TrustDecision> {
    if age_ms > HEARTBEAT_STALE_MS {
        Some(TrustDecision {
            mode: WarmupMode::FullRefresh,
            reason: "heartbeat stale",
        })
    } else {
        None
    }
}

fn sentinel_decision(newest_ms: Option<i64>, now_ms: i64) -> TrustDecision {
    match newest_ms {
        None => TrustDecision {
            mode: WarmupMode::FullRefresh,
            reason: "sentinel empty",
        },
        Some(ts) => {
            let age_ms = now_ms - ts;
            if age_ms > SENTINEL_STALE_MS {
                TrustDecision {
                    mode: WarmupMode::FullRefresh,
                    reason: "sentinel stale",
                }
            } else {
                TrustDecision {
                    mode: WarmupMode::Targeted,
                    reason: "sentinel fresh",
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_exactly_at_threshold_falls_through() {
        assert_eq!(heartbeat_decision(HEARTBEAT_STALE_MS), None);
    }

    #[test]
    fn heartbeat_past_threshold_forces_full_refresh() {
        let decision = heartbeat_decision(HEARTBEAT_STALE_MS + 1).unwrap();
        assert_eq!(decision.mode, WarmupMode::FullRefresh);
        assert_eq!(decision.reason, "heartbeat stale");
    }

    #[test]
    fn sentinel_missing_forces_full_refresh() {
        let decision = sentinel_decision(None, 1_000_000);
        assert_eq!(decision.mode, WarmupMode::FullRefresh);
        assert_eq!(decision.reason, "sentinel empty");
    }

    #[test]
    fn sentinel_exactly_at_threshold_is_targeted() {
        // §8 boundary behaviour: strict-greater, so age == threshold stays targeted.
        let decision = sentinel_decision(Some(0), SENTINEL_STALE_MS);
        assert_eq!(decision.mode, WarmupMode::Targeted);
        assert_eq!(decision.reason, "sentinel fresh");
    }

    #[test]
    fn sentinel_past_threshold_forces_full_refresh() {
        let decision = sentinel_decision(Some(0), SENTINEL_STALE_MS + 1);
        assert_eq!(decision.mode, WarmupMode::FullRefresh);
        assert_eq!(decision.reason, "sentinel stale");
    }
}

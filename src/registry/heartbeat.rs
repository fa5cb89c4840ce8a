//! Heartbeat loop (§4.K). The single writer of `InstanceStatus` — every
//! other subsystem only reads this key. Cadence comes from
//! `AppConfig.heartbeat_interval_ms` (default 15s, §6); the TTL is
//! always 3x that interval (§3 Instance Status invariant), not the
//! fixed 45s `keys::INSTANCE_STATUS_TTL_SECS` default unless the
//! configured interval happens to be the default 15s.

use std::sync::Arc;
use std::time::Duration;

use redis::AsyncCommands;
use tracing::warn;

use super::InstanceRegistry;
use crate::cache::keys;
use crate::error::Result;
use crate::redis_handle::RedisHandle;
use crate::types::InstanceStatus;

pub async fn write_status(redis: &RedisHandle, exchange_id: i32, status: &InstanceStatus, ttl_secs: u64) -> Result<()> {
    let mut conn = redis.connection();
    let body = serde_json::to_string(status)?;
    conn.set_ex(keys::instance_status(exchange_id), body, ttl_secs).await?;
    Ok(())
}

/// Runs until `cancel` fires, taking a fresh snapshot from `registry` on
/// every tick so the written status always reflects the current FSM
/// state without the registry needing to push updates into this task.
pub async fn run_heartbeat_loop(
    registry: Arc<InstanceRegistry>,
    interval: Duration,
    mut cancel: tokio::sync::watch::Receiver<bool>,
) {
    let ttl_secs = interval.as_secs().saturating_mul(3).max(1);
    loop {
        tokio::select! {
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return;
                }
            }
            _ = tokio::time::sleep(interval) => {
                let status = registry.snapshot().await;
                if let Err(e) = write_status(&registry.redis(), registry.exchange_id(), &status, ttl_secs).await {
                    warn!(exchange_id = registry.exchange_id(), error = %e, "heartbeat write failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_three_times_the_configured_interval() {
        assert_eq!(Duration::from_millis(15_000).as_secs().saturating_mul(3), 45);
        assert_eq!(Duration::from_millis(5_000).as_secs().saturating_mul(3), 15);
    }
}

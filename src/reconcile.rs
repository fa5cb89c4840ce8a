//! Boundary Reconciliation (§4.H). The safety net for missed streaming
//! events: on every timeframe boundary, REST-fetch the last few closed
//! candles and reconcile them through the same versioned writer the
//! live stream uses.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::backoff::BackoffPolicy;
use crate::error::Result;
use crate::exchange::ExchangeAdapter;
use crate::cache::CacheWriter;
use crate::types::Timeframe;

/// Closed candles re-fetched per boundary (§4.H).
const BOUNDARY_FETCH_DEPTH: u32 = 3;
const MAX_RETRIES_PER_BOUNDARY: u32 = 3;

/// Tracks the next boundary timestamp per (symbol,timeframe) so the
/// reconciler only fires once per grid crossing, not on every poll.
pub struct BoundaryTimer {
    next_boundary_ms: HashMap<(String, Timeframe), i64>,
}

impl BoundaryTimer {
    pub fn new(pairs: &[(String, Timeframe)], now_ms: i64) -> Self {
        let mut next_boundary_ms = HashMap::new();
        for (symbol, timeframe) in pairs {
            let duration = timeframe.duration_ms();
            let next = ((now_ms / duration) + 1) * duration;
            next_boundary_ms.insert((symbol.clone(), *timeframe), next);
        }
        Self { next_boundary_ms }
    }

    /// Pairs whose boundary has passed as of `now_ms`, advancing their
    /// schedule so each boundary fires exactly once.
    pub fn due(&mut self, now_ms: i64) -> Vec<(String, Timeframe)> {
        let mut fired = Vec::new();
        for (key, next) in self.next_boundary_ms.iter_mut() {
            if now_ms >= *next {
                fired.push(key.clone());
                let duration = key.1.duration_ms();
                *next = ((now_ms / duration) + 1) * duration;
            }
        }
        fired
    }
}

pub struct BoundaryReconciler {
    writer: CacheWriter,
}

impl BoundaryReconciler {
    pub fn new(writer: CacheWriter) -> Self {
        Self { writer }
    }

    /// Reconciles one (symbol,timeframe) boundary crossing, retrying
    /// transient REST failures with the shared backoff policy bounded to
    /// `MAX_RETRIES_PER_BOUNDARY` attempts.
    pub async fn reconcile(
        &self,
        adapter: &dyn ExchangeAdapter,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<u32> {
        let policy = BackoffPolicy::default();
        let mut attempt = 0;

        let candles = loop {
            match adapter.fetch_recent_candles(symbol, timeframe, BOUNDARY_FETCH_DEPTH).await {
                Ok(candles) => break candles,
                Err(e) if attempt + 1 >= MAX_RETRIES_PER_BOUNDARY => return Err(e),
                Err(e) => {
                    warn!(exchange = adapter.exchange_name(), symbol, ?timeframe, error = %e, attempt, "boundary fetch failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                }
            }
        };

        let mut gap_repairs = 0;
        for candle in &candles {
            let replaced = self.writer.add_candle_if_newer(candle, true).await?;
            if replaced {
                gap_repairs += 1;
                info!(
                    exchange_id = candle.exchange_id,
                    symbol,
                    ?timeframe,
                    timestamp_ms = candle.timestamp_ms,
                    "gap repair: boundary reconciliation replaced a candle"
                );
            }
        }
        Ok(gap_repairs)
    }
}

/// Drives the reconciliation loop for a fixed set of subscribed pairs,
/// polling the system clock at a cadence finer than the smallest
/// timeframe so boundaries aren't missed (§5 Suspension points).
pub async fn run_boundary_loop(
    reconciler: BoundaryReconciler,
    adapter: Box<dyn ExchangeAdapter>,
    pairs: Vec<(String, Timeframe)>,
    mut cancel: tokio::sync::watch::Receiver<bool>,
) {
    const POLL_INTERVAL: Duration = Duration::from_secs(5);
    let mut timer = BoundaryTimer::new(&pairs, Utc::now().timestamp_millis());

    loop {
        tokio::select! {
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return;
                }
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {
                let due = timer.due(Utc::now().timestamp_millis());
                for (symbol, timeframe) in due {
                    if let Err(e) = reconciler.reconcile(adapter.as_ref(), &symbol, timeframe).await {
                        warn!(symbol, ?timeframe, error = %e, "boundary reconciliation exhausted retries");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_timer_fires_exactly_once_per_crossing() {
        let pairs = vec![("BTC-USD".to_string(), Timeframe::M1)];
        let mut timer = BoundaryTimer::new(&pairs, 0);
        assert!(timer.due(30_000).is_empty());
        let fired = timer.due(60_000);
        assert_eq!(fired.len(), 1);
        assert!(timer.due(60_000).is_empty());
        let fired_again = timer.due(120_000);
        assert_eq!(fired_again.len(), 1);
    }
}

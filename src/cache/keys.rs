//! Single source of truth for every Redis key shape (§4.A). No other
//! module is allowed to build a cache key by formatting a string itself —
//! grounded in the teacher's `get_table_name` / `get_ticks_table` pattern
//! (one module owning "what name does this data live under"), generalized
//! from Postgres table names to Redis key names.

use crate::types::Timeframe;

pub fn candles(exchange_id: i32, symbol: &str, timeframe: Timeframe) -> String {
    format!("candles:{exchange_id}:{symbol}:{}", timeframe.as_str())
}

pub fn candles_scan_pattern(exchange_id: i32) -> String {
    format!("candles:{exchange_id}:*")
}

pub fn indicator(exchange_id: i32, symbol: &str, timeframe: Timeframe, indicator_type: &str) -> String {
    format!(
        "indicator:{exchange_id}:{symbol}:{}:{indicator_type}",
        timeframe.as_str()
    )
}

pub fn ticker(exchange_id: i32, symbol: &str) -> String {
    format!("ticker:{exchange_id}:{symbol}")
}

pub fn channel_candle_close(exchange_id: i32, symbol: &str, timeframe: Timeframe) -> String {
    format!(
        "channel:candle:close:{exchange_id}:{symbol}:{}",
        timeframe.as_str()
    )
}

/// Pattern used by the indicator scheduler to subscribe to every
/// (symbol,timeframe) close event for this exchange in one PSUBSCRIBE.
pub fn channel_candle_close_pattern(exchange_id: i32) -> String {
    format!("channel:candle:close:{exchange_id}:*")
}

pub fn channel_alerts(exchange_id: i32) -> String {
    format!("channel:alerts:exchange:{exchange_id}")
}

pub fn warmup_schedule(exchange_id: i32) -> String {
    format!("exchange:{exchange_id}:warm-up-schedule:symbols")
}

pub fn warmup_stats(exchange_id: i32) -> String {
    format!("exchange:{exchange_id}:warm-up-schedule:stats")
}

pub fn instance_status(exchange_id: i32) -> String {
    format!("exchange:{exchange_id}:status")
}

pub fn instance_activity(exchange_id: i32) -> String {
    format!("exchange:{exchange_id}:activity")
}

pub fn commands(user_id: &str) -> String {
    format!("livermore:commands:{user_id}")
}

pub fn commands_response(user_id: &str) -> String {
    format!("livermore:commands:{user_id}:response")
}

/// TTL for the instance status key: 3x the 15s heartbeat cadence (§3).
pub const INSTANCE_STATUS_TTL_SECS: u64 = 45;

/// Default cap on the activity stream length (§4.A "capped length").
pub const ACTIVITY_STREAM_MAXLEN: usize = 5_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candle_key_is_exchange_scoped() {
        let key = candles(7, "BTC-USD", Timeframe::M5);
        assert_eq!(key, "candles:7:BTC-USD:5m");
        assert!(key.contains("7"));
    }

    #[test]
    fn scan_pattern_matches_candle_keys() {
        let pattern = candles_scan_pattern(7);
        assert_eq!(pattern, "candles:7:*");
    }
}

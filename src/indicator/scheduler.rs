//! Indicator Scheduler (§4.I). Subscribes to every candle-close event
//! for an exchange, recomputes each registered calculator's value, and
//! forwards synchronously to the alert evaluator.

use futures_util::StreamExt;
use redis::AsyncCommands;
use tracing::{error, warn};

use super::calculator::DerivedValueCalculator;
use crate::alert::AlertEvaluator;
use crate::cache::keys;
use crate::error::Result;
use crate::redis_handle::RedisHandle;
use crate::types::{Candle, Timeframe};

pub struct IndicatorScheduler {
    redis: RedisHandle,
    calculators: Vec<Box<dyn DerivedValueCalculator>>,
    evaluator: AlertEvaluator,
}

impl IndicatorScheduler {
    pub fn new(redis: RedisHandle, calculators: Vec<Box<dyn DerivedValueCalculator>>, evaluator: AlertEvaluator) -> Self {
        Self { redis, calculators, evaluator }
    }

    /// Runs until `cancel` fires. Grounded in the teacher's use of a
    /// dedicated pub/sub connection per long-running subscriber — the
    /// shared `ConnectionManager` doesn't support SUBSCRIBE.
    pub async fn run(&self, exchange_id: i32, mut cancel: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        let mut pubsub = self.redis.pubsub().await?;
        pubsub.psubscribe(keys::channel_candle_close_pattern(exchange_id)).await?;
        let mut stream = pubsub.on_message();

        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        return Ok(());
                    }
                }
                msg = stream.next() => {
                    let Some(msg) = msg else { return Ok(()) };
                    let channel: String = msg.get_channel_name().to_string();
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(channel, error = %e, "candle-close payload not a string");
                            continue;
                        }
                    };
                    if let Err(e) = self.handle_close(&channel, &payload).await {
                        error!(channel, error = %e, "failed processing candle-close event");
                    }
                }
            }
        }
    }

    async fn handle_close(&self, channel: &str, payload: &str) -> Result<()> {
        let (symbol, timeframe) = match parse_close_channel(channel) {
            Some(parts) => parts,
            None => {
                warn!(channel, "unrecognized candle-close channel shape");
                return Ok(());
            }
        };

        let envelope: serde_json::Value = serde_json::from_str(payload)?;
        let candle: Candle = serde_json::from_value(envelope["candle"].clone())?;
        let exchange_id = candle.exchange_id;

        for calculator in &self.calculators {
            let writer = self.redis.writer();
            let window = writer
                .recent_candles(exchange_id, &symbol, timeframe, calculator.window_len() as isize)
                .await?;
            if window.is_empty() {
                continue;
            }

            let value = calculator.compute(&window);
            let key = keys::indicator(exchange_id, &symbol, timeframe, calculator.indicator_type());
            let mut conn = self.redis.connection();
            let body = serde_json::to_string(&value)?;
            conn.set(&key, body).await?;

            self.evaluator
                .evaluate(exchange_id, &symbol, timeframe, calculator.indicator_type(), &value, candle.close)
                .await?;
        }

        Ok(())
    }
}

/// `channel:candle:close:{exchange_id}:{symbol}:{timeframe}` → (symbol, timeframe).
fn parse_close_channel(channel: &str) -> Option<(String, Timeframe)> {
    let parts: Vec<&str> = channel.split(':').collect();
    if parts.len() != 6 {
        return None;
    }
    let timeframe = Timeframe::parse(parts[5])?;
    Some((parts[4].to_string(), timeframe))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_close_channel() {
        let (symbol, timeframe) = parse_close_channel("channel:candle:close:7:BTC-USD:5m").unwrap();
        assert_eq!(symbol, "BTC-USD");
        assert_eq!(timeframe, Timeframe::M5);
    }

    #[test]
    fn rejects_malformed_channel() {
        assert!(parse_close_channel("channel:candle:close:7").is_none());
    }
}

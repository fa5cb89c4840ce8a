//! Aggregates trade prints into OHLCV candles per (symbol,timeframe),
//! closing one exactly when the clock crosses into the next grid slot.
//!
//! Generalized from the single-timeframe, single-symbol
//! `CandleAggregator` pattern (one builder per symbol, finalize-on-new-
//! minute) to the multi-timeframe grid this spec needs — every
//! subscribed timeframe gets its own builder per symbol, all fed by the
//! same trade stream.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::types::{Candle, Timeframe};

#[derive(Debug, Clone)]
struct CandleBuilder {
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    grid_start_ms: i64,
    sequence_num: i64,
}

impl CandleBuilder {
    fn new(price: Decimal, grid_start_ms: i64, sequence_num: i64) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
            volume: Decimal::ZERO,
            grid_start_ms,
            sequence_num,
        }
    }

    fn update(&mut self, price: Decimal, quantity: Decimal, sequence_num: i64) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
        self.volume += quantity;
        self.sequence_num = sequence_num;
    }

    fn build(&self, exchange_id: i32, symbol: &str, timeframe: Timeframe) -> Candle {
        Candle {
            exchange_id,
            symbol: symbol.to_string(),
            timeframe,
            timestamp_ms: self.grid_start_ms,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            sequence_num: self.sequence_num,
        }
    }
}

fn grid_start_ms(timestamp_ms: i64, timeframe: Timeframe) -> i64 {
    let grid = timeframe.duration_ms();
    timestamp_ms - timestamp_ms.rem_euclid(grid)
}

pub struct MultiTimeframeAggregator {
    exchange_id: i32,
    timeframes: Vec<Timeframe>,
    builders: HashMap<(String, Timeframe), CandleBuilder>,
}

impl MultiTimeframeAggregator {
    pub fn new(exchange_id: i32, timeframes: Vec<Timeframe>) -> Self {
        Self {
            exchange_id,
            timeframes,
            builders: HashMap::new(),
        }
    }

    /// Feed one trade print. Returns every candle that closed as a result
    /// (at most one per subscribed timeframe).
    pub fn on_trade(
        &mut self,
        symbol: &str,
        price: Decimal,
        quantity: Decimal,
        timestamp: DateTime<Utc>,
        sequence_num: i64,
    ) -> Vec<Candle> {
        let timestamp_ms = timestamp.timestamp_millis();
        let mut closed = Vec::new();

        for &timeframe in &self.timeframes {
            let bucket = grid_start_ms(timestamp_ms, timeframe);
            let key = (symbol.to_string(), timeframe);

            match self.builders.get_mut(&key) {
                Some(builder) if builder.grid_start_ms == bucket => {
                    builder.update(price, quantity, sequence_num);
                }
                Some(builder) => {
                    closed.push(builder.build(self.exchange_id, symbol, timeframe));
                    let mut fresh = CandleBuilder::new(price, bucket, sequence_num);
                    fresh.update(price, quantity, sequence_num);
                    self.builders.insert(key, fresh);
                }
                None => {
                    let mut fresh = CandleBuilder::new(price, bucket, sequence_num);
                    fresh.update(price, quantity, sequence_num);
                    self.builders.insert(key, fresh);
                }
            }
        }

        closed
    }

    /// In-progress candle for a (symbol,timeframe), if one has started.
    /// Used for "open" candle distinctions per §4.C close-vs-open rule.
    pub fn open_candle(&self, symbol: &str, timeframe: Timeframe) -> Option<Candle> {
        self.builders
            .get(&(symbol.to_string(), timeframe))
            .map(|b| b.build(self.exchange_id, symbol, timeframe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn closes_exactly_on_grid_crossing() {
        let mut agg = MultiTimeframeAggregator::new(1, vec![Timeframe::M1]);
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 59).unwrap();
        let t3 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 5).unwrap();

        assert!(agg.on_trade("BTC-USD", dec!(100), dec!(1), t1, 1).is_empty());
        assert!(agg.on_trade("BTC-USD", dec!(95), dec!(1), t2, 2).is_empty());

        let closed = agg.on_trade("BTC-USD", dec!(101), dec!(1), t3, 3);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].low, dec!(95));
        assert_eq!(closed[0].close, dec!(95));
        assert!(closed[0].is_valid());
    }

    #[test]
    fn independent_timeframes_close_independently() {
        let mut agg = MultiTimeframeAggregator::new(1, vec![Timeframe::M1, Timeframe::M5]);
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 1).unwrap();

        let closed = agg.on_trade("ETH-USD", dec!(10), dec!(1), t1, 1);
        assert!(closed.is_empty());

        let closed = agg.on_trade("ETH-USD", dec!(11), dec!(1), t2, 2);
        // The 1m bucket rolled over; the 5m bucket has not.
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].timeframe, Timeframe::M1);
    }
}

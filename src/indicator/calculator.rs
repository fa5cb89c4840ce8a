//! The derived-value calculator (§4.I) is treated as an opaque external
//! collaborator by the rest of the system — it only needs to answer
//! "given these candles, what's the value". Open Question #3: we ship
//! one reference implementation (a momentum/stage calculator) behind
//! the trait so the scheduler never depends on its internals.

use rust_decimal::prelude::ToPrimitive;

use crate::types::{Candle, IndicatorParams, IndicatorValue};

/// Minimum candles a calculator needs before it can produce a seeded
/// value; fewer than this and `params.seeded` must be `false`.
pub const MIN_SEED_CANDLES: usize = 52;

pub trait DerivedValueCalculator: Send + Sync {
    fn indicator_type(&self) -> &str;

    /// `candles` is oldest-first, newest-last, already trimmed to the
    /// window the calculator asked for via `window_len`.
    fn compute(&self, candles: &[Candle]) -> IndicatorValue;

    /// How many trailing candles `compute` wants to see.
    fn window_len(&self) -> usize {
        MIN_SEED_CANDLES
    }
}

/// Reference momentum/stage calculator: a smoothed rate-of-change over
/// the window, staged into discretized momentum buckets. Not the
/// production algorithm — a concrete stand-in that satisfies the
/// calculator contract end to end.
pub struct MomentumStageCalculator;

impl DerivedValueCalculator for MomentumStageCalculator {
    fn indicator_type(&self) -> &str {
        "momentum_stage"
    }

    fn compute(&self, candles: &[Candle]) -> IndicatorValue {
        let seeded = candles.len() >= MIN_SEED_CANDLES;
        let n_eff = candles.len();

        let (raw_value, stage) = match candles.last() {
            None => (0.0, "flat".to_string()),
            Some(latest) => {
                let first = candles.first().unwrap();
                let first_close = first.close.to_f64().unwrap_or(0.0);
                let latest_close = latest.close.to_f64().unwrap_or(0.0);
                let raw_value = if first_close.abs() > f64::EPSILON {
                    ((latest_close - first_close) / first_close) * 100.0
                } else {
                    0.0
                };
                let stage = if raw_value > 0.5 {
                    "rising"
                } else if raw_value < -0.5 {
                    "falling"
                } else {
                    "flat"
                };
                (raw_value, stage.to_string())
            }
        };

        let timestamp_ms = candles.last().map(|c| c.timestamp_ms).unwrap_or(0);
        let mut value = std::collections::HashMap::new();
        value.insert("raw_value".to_string(), raw_value);

        IndicatorValue {
            timestamp_ms,
            indicator_type: self.indicator_type().to_string(),
            value,
            params: IndicatorParams {
                stage,
                seeded,
                n_eff,
                extra: std::collections::HashMap::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn candle(close: rust_decimal::Decimal, ts: i64) -> Candle {
        Candle {
            exchange_id: 1,
            symbol: "BTC-USD".into(),
            timeframe: crate::types::Timeframe::M5,
            timestamp_ms: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
            sequence_num: ts,
        }
    }

    #[test]
    fn unseeded_below_window_threshold() {
        let candles = vec![candle(dec!(100), 1), candle(dec!(101), 2)];
        let calc = MomentumStageCalculator;
        let value = calc.compute(&candles);
        assert!(!value.params.seeded);
        assert_eq!(value.params.n_eff, 2);
        let _ = Utc::now();
    }

    #[test]
    fn rising_stage_on_positive_move() {
        let candles: Vec<Candle> = (0..60).map(|i| candle(dec!(100) + rust_decimal::Decimal::from(i), i as i64)).collect();
        let calc = MomentumStageCalculator;
        let value = calc.compute(&candles);
        assert!(value.params.seeded);
        assert_eq!(value.params.stage, "rising");
    }
}

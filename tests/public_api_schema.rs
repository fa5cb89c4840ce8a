//! §8 property 6: the Public Read API never emits a field absent from
//! the §4.M schemas. Serializes each response struct and asserts its
//! JSON key set is exactly the allowed set — nothing more, nothing
//! less, independent of field order.

use std::collections::BTreeSet;

use livermore_core::api::public::{AlertOut, CandleOut, SignalOut, SymbolOut};

fn keys(value: &serde_json::Value) -> BTreeSet<String> {
    value.as_object().expect("response struct serializes to a JSON object").keys().cloned().collect()
}

fn set(fields: &[&str]) -> BTreeSet<String> {
    fields.iter().map(|s| s.to_string()).collect()
}

#[test]
fn candle_schema_is_exactly_ohlcv_plus_timestamp() {
    let candle = CandleOut {
        timestamp_ms: 1_700_000_000_000,
        open: "100".parse().unwrap(),
        high: "101".parse().unwrap(),
        low: "99".parse().unwrap(),
        close: "100.5".parse().unwrap(),
        volume: "12.3".parse().unwrap(),
    };
    let json = serde_json::to_value(&candle).unwrap();
    assert_eq!(keys(&json), set(&["timestamp_ms", "open", "high", "low", "close", "volume"]));
}

#[test]
fn symbol_schema_is_exactly_exchange_symbol_liquidity() {
    let symbol = SymbolOut { exchange: "coinbase".to_string(), symbol: "BTC-USD".to_string(), liquidity: "high" };
    let json = serde_json::to_value(&symbol).unwrap();
    assert_eq!(keys(&json), set(&["exchange", "symbol", "liquidity"]));
}

#[test]
fn signal_schema_matches_4m_exactly() {
    let signal = SignalOut { signal_type: "momentum_signal", timeframe: "1h", direction: "bullish", strength: "strong" };
    let json = serde_json::to_value(&signal).unwrap();
    assert_eq!(keys(&json), set(&["type", "timeframe", "direction", "strength"]));
}

/// §8 scenario 5's literal expected body:
/// `{direction, strength, price, signal_type, timeframe, exchange, symbol}`.
#[test]
fn alert_schema_matches_scenario_5_exactly() {
    let alert = AlertOut {
        signal_type: "momentum_signal",
        exchange: "coinbase".to_string(),
        symbol: "BTC-USD".to_string(),
        timeframe: "1h".to_string(),
        price: "50000.12".parse().unwrap(),
        direction: "bullish",
        strength: "strong",
    };
    let json = serde_json::to_value(&alert).unwrap();
    assert_eq!(keys(&json), set(&["signal_type", "exchange", "symbol", "timeframe", "price", "direction", "strength"]));
}

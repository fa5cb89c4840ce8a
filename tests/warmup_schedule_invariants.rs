//! §8 warmup invariants that don't need a live Redis connection: the
//! schedule a fully-sufficient scan produces has nothing left to fetch,
//! and a schedule built twice from the same scan is byte-identical
//! modulo its timestamp (the round-trip / idempotence property, scoped
//! to the pure scan -> schedule step).

use livermore_core::types::{ScanReason, Timeframe, WarmupMode};
use livermore_core::warmup::schedule::{pending_entries, WarmupScheduleBuilder};
use livermore_core::warmup::scanner::ScanPairResult;

fn pair(symbol: &str, timeframe: Timeframe, sufficient: bool, reason: ScanReason) -> ScanPairResult {
    ScanPairResult {
        symbol: symbol.to_string(),
        timeframe,
        cached_count: if sufficient { 100 } else { 0 },
        newest_candle_age_ms: Some(if sufficient { 60_000 } else { 0 }),
        sufficient,
        reason,
    }
}

/// §8 scenario 1: warm restart, nothing stale, 2 symbols x 6 timeframes
/// all sufficient -> zero fetch work and an empty schedule.
#[test]
fn warm_restart_scan_yields_no_fetch_work() {
    let timeframes = [Timeframe::M1, Timeframe::M5, Timeframe::M15, Timeframe::M30, Timeframe::H1, Timeframe::H4];
    let symbols = ["BTC-USD", "ETH-USD"];

    let scan_results: Vec<ScanPairResult> =
        symbols.iter().flat_map(|s| timeframes.iter().map(move |tf| pair(s, *tf, true, ScanReason::Ok))).collect();

    let schedule = WarmupScheduleBuilder::build(WarmupMode::Targeted, &scan_results);

    assert_eq!(schedule.total_pairs, 12);
    assert_eq!(schedule.sufficient_pairs, 12);
    assert_eq!(schedule.needs_fetching, 0);
    assert!(pending_entries(&schedule).is_empty());
}

/// Running the scan -> schedule step twice in a row with no streaming
/// traffic between them (cache state unchanged) must not manufacture
/// fetch work the second time around.
#[test]
fn rebuilding_from_an_unchanged_scan_is_idempotent() {
    let scan_results =
        vec![pair("BTC-USD", Timeframe::M5, true, ScanReason::Ok), pair("ETH-USD", Timeframe::M5, false, ScanReason::Stale)];

    let first = WarmupScheduleBuilder::build(WarmupMode::Targeted, &scan_results);
    let second = WarmupScheduleBuilder::build(WarmupMode::Targeted, &scan_results);

    assert_eq!(first.needs_fetching, second.needs_fetching);
    assert_eq!(first.entries.len(), second.entries.len());
    assert_eq!(
        pending_entries(&first).iter().map(|e| &e.symbol).collect::<Vec<_>>(),
        pending_entries(&second).iter().map(|e| &e.symbol).collect::<Vec<_>>(),
    );
}

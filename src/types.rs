//! Core data model (§3). Kept as plain data classes with explicit schemas —
//! per §9, the schedule/stats/indicator blobs are cross-language JSON
//! contracts, not reflection-driven.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "1m" => Timeframe::M1,
            "5m" => Timeframe::M5,
            "15m" => Timeframe::M15,
            "30m" => Timeframe::M30,
            "1h" => Timeframe::H1,
            "4h" => Timeframe::H4,
            "1d" => Timeframe::D1,
            _ => return None,
        })
    }

    /// Grid length in milliseconds, used to align `timestamp_ms` and to
    /// compute the next boundary (§4.H).
    pub fn duration_ms(&self) -> i64 {
        match self {
            Timeframe::M1 => 60_000,
            Timeframe::M5 => 5 * 60_000,
            Timeframe::M15 => 15 * 60_000,
            Timeframe::M30 => 30 * 60_000,
            Timeframe::H1 => 60 * 60_000,
            Timeframe::H4 => 4 * 60 * 60_000,
            Timeframe::D1 => 24 * 60 * 60_000,
        }
    }

    /// Tiered scan order from §4.E: coarse timeframes first, since a
    /// failing sentinel on a coarse timeframe implies the whole pipeline
    /// was down, not just one granularity.
    pub const TIERED_ORDER: [Timeframe; 6] = [
        Timeframe::D1,
        Timeframe::H4,
        Timeframe::H1,
        Timeframe::M15,
        Timeframe::M5,
        Timeframe::M1,
    ];

    /// Per-timeframe staleness threshold in ms, per §4.E's table.
    pub fn staleness_threshold_ms(&self) -> i64 {
        match self {
            Timeframe::D1 => 90_000_000,
            Timeframe::H4 => 18_000_000,
            Timeframe::H1 => 7_200_000,
            Timeframe::M30 => 3_600_000,
            Timeframe::M15 => 2_700_000,
            Timeframe::M5 => 3_600_000,
            Timeframe::M1 => 3_600_000,
        }
    }
}

/// One OHLCV observation (§3 Candle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub exchange_id: i32,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp_ms: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub sequence_num: i64,
}

impl Candle {
    /// §3 invariant: `low <= open,close <= high`.
    pub fn is_valid(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
    }
}

/// Derived value for one (exchange,symbol,timeframe,type) (§3 Indicator Value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorValue {
    pub timestamp_ms: i64,
    #[serde(rename = "type")]
    pub indicator_type: String,
    pub value: HashMap<String, f64>,
    pub params: IndicatorParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorParams {
    pub stage: String,
    pub seeded: bool,
    pub n_eff: usize,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Last-trade snapshot per (exchange,symbol) (§3 Ticker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub price: Decimal,
    pub volume_24h: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupMode {
    FullRefresh,
    Targeted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupScheduleEntry {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub cached_count: u32,
    pub target_count: u32,
    pub reason: ScanReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanReason {
    Ok,
    LowCount,
    Stale,
    Empty,
}

/// Persisted as a single JSON blob per exchange (§3 Warmup Schedule).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupSchedule {
    pub mode: WarmupMode,
    pub total_pairs: u32,
    pub sufficient_pairs: u32,
    pub needs_fetching: u32,
    pub entries: Vec<WarmupScheduleEntry>,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupStatus {
    Assessing,
    Dumping,
    Scanning,
    Fetching,
    Complete,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupFailure {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub error: String,
}

/// Real-time progress snapshot, overwritten on every batch (§3 Warmup Stats).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupStats {
    pub status: WarmupStatus,
    pub mode: WarmupMode,
    pub completed: u32,
    pub failed: u32,
    pub total: u32,
    pub percent_complete: f32,
    pub eta_ms: Option<u64>,
    pub current: Option<(String, Timeframe)>,
    pub next: Option<(String, Timeframe)>,
    pub failures: Vec<WarmupFailure>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStateLabel {
    Idle,
    Starting,
    Warming,
    Active,
    Stopping,
    Stopped,
    Offline,
}

/// One per running instance, persisted under a TTL'd key (§3 Instance Status).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub exchange_id: i32,
    pub exchange_name: String,
    pub hostname: String,
    pub ip: String,
    pub admin_email: Option<String>,
    pub admin_display_name: Option<String>,
    pub connection_state: ConnectionStateLabel,
    pub symbol_count: u32,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_heartbeat: DateTime<Utc>,
    pub last_state_change: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// One event in a per-exchange Redis Stream (§3 Activity Entry). The
/// source system uses a flat string map; we mirror that shape exactly
/// since it's a cross-language stream contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub event: String,
    pub exchange_id: String,
    pub exchange_name: String,
    pub hostname: String,
    pub ip: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub fields: HashMap<String, String>,
}

/// One triggering event (§3 Alert). Internal shape — the public surface
/// exposes only the generic transformed fields in §4.M.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub exchange_id: i32,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub alert_type: String,
    pub triggered_at: DateTime<Utc>,
    pub triggered_at_epoch: i64,
    pub price: Decimal,
    pub trigger_value: f64,
    pub trigger_label: String,
    pub previous_label: Option<String>,
    pub details: serde_json::Value,
    pub notification_sent: bool,
    pub notification_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub id: i32,
    pub name: String,
    pub display_name: String,
    pub ws_url: String,
    pub rest_url: String,
    pub supported_timeframes: Vec<String>,
    pub is_active: bool,
}

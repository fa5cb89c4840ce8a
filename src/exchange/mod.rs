//! Exchange Adapter runtime (§4.B). A single typed interface over any
//! exchange's WebSocket/REST pair; concrete adapters only differ in wire
//! parsing (`coinbase.rs`, `binance.rs`, `kraken.rs` — the latter
//! generalized from the teacher's `KrakenIngester`).

pub mod aggregator;
pub mod binance;
pub mod coinbase;
pub mod kraken;
pub mod stub;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::backoff::BackoffPolicy;
use crate::error::{LivermoreError, Result};
use crate::types::{Candle, Ticker, Timeframe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Reconnecting,
}

#[derive(Debug, Clone)]
pub enum ExchangeEvent {
    CandleClose(Candle),
    /// Amended candle whose source sequence increased after the original
    /// close was already published (§4.B boundary emission rule).
    CandleUpdate(Candle),
    TickerUpdate { symbol: String, ticker: Ticker },
    Connected,
    Disconnected,
    Reconnecting { attempt: u32 },
    Error(String),
}

/// Capability set required of every exchange adapter (§4.B).
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn exchange_id(&self) -> i32;
    fn exchange_name(&self) -> &str;

    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
    async fn subscribe(&mut self, symbols: &[String], timeframes: &[Timeframe]) -> Result<()>;
    async fn unsubscribe(&mut self, symbols: &[String]) -> Result<()>;
    fn is_connected(&self) -> bool;

    /// Block until the next adapter-level event. Implementations own their
    /// transport loop and translate wire messages into `ExchangeEvent`.
    async fn next_event(&mut self) -> Result<ExchangeEvent>;

    /// Fetch the last `limit` closed candles for a pair+timeframe via REST.
    /// Used by both the warmup fetch phase (§4.G) and boundary
    /// reconciliation (§4.H).
    async fn fetch_recent_candles(&self, symbol: &str, timeframe: Timeframe, limit: u32) -> Result<Vec<Candle>>;
}

/// Tracks the subscription set as source-of-truth so reconnects can
/// re-assert it before any events are re-emitted (§4.B subscription
/// semantics). Shared by every concrete adapter via composition.
#[derive(Default, Clone)]
pub struct SubscriptionSet {
    inner: Arc<RwLock<HashSet<String>>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, symbols: &[String]) {
        let mut guard = self.inner.write().await;
        for s in symbols {
            guard.insert(s.clone());
        }
    }

    pub async fn remove(&self, symbols: &[String]) {
        let mut guard = self.inner.write().await;
        for s in symbols {
            guard.remove(s);
        }
    }

    pub async fn snapshot(&self) -> Vec<String> {
        self.inner.read().await.iter().cloned().collect()
    }
}

/// Drives an adapter's reconnect loop with exponential backoff + jitter
/// (§4.B), forwarding every event onto a bounded channel for the rest of
/// the system to consume. A successful `Connected` event resets the
/// attempt counter.
pub async fn run_with_reconnect(
    mut adapter: Box<dyn ExchangeAdapter>,
    timeframes: Vec<Timeframe>,
    events: mpsc::Sender<ExchangeEvent>,
    mut cancel: tokio::sync::watch::Receiver<bool>,
) {
    let policy = BackoffPolicy::default();
    let mut attempt: u32 = 0;

    loop {
        if *cancel.borrow() {
            info!(exchange = adapter.exchange_name(), "adapter loop cancelled before connect");
            return;
        }

        match adapter.connect().await {
            Ok(()) => {
                attempt = 0;
                let _ = events.send(ExchangeEvent::Connected).await;
                let symbols = Vec::new(); // re-asserted by caller via subscribe()
                if let Err(e) = adapter.subscribe(&symbols, &timeframes).await {
                    warn!(exchange = adapter.exchange_name(), error = %e, "re-subscribe after connect failed");
                }
            }
            Err(e) => {
                warn!(exchange = adapter.exchange_name(), error = %e, "connect failed");
                match e {
                    LivermoreError::AuthFailed { .. } | LivermoreError::GeoRestricted { .. } => {
                        let _ = events.send(ExchangeEvent::Error(e.to_string())).await;
                        return;
                    }
                    _ => {
                        attempt += 1;
                        let _ = events.send(ExchangeEvent::Reconnecting { attempt }).await;
                        tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                        continue;
                    }
                }
            }
        }

        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        let _ = adapter.disconnect().await;
                        return;
                    }
                }
                event = adapter.next_event() => {
                    match event {
                        Ok(ev) => {
                            if events.send(ev).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(exchange = adapter.exchange_name(), error = %e, "transport error, reconnecting");
                            match e {
                                LivermoreError::AuthFailed { .. } | LivermoreError::GeoRestricted { .. } => {
                                    let _ = events.send(ExchangeEvent::Error(e.to_string())).await;
                                    return;
                                }
                                _ => {
                                    attempt += 1;
                                    let _ = events.send(ExchangeEvent::Reconnecting { attempt }).await;
                                    tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Idle-read timeout after which the adapter should treat the connection
/// as dead and trigger a reconnect (§5 Suspension points).
pub const WS_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

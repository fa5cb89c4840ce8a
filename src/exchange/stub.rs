//! KuCoin and MEXC are listed in the `exchanges` table but the source
//! this spec was distilled from predominantly implements Coinbase and
//! the Binance family (§9 Open Questions). Rather than invent wire
//! formats from partial hints, these get a documented stub that honors
//! the abstract `ExchangeAdapter` contract and fails loudly.

use async_trait::async_trait;

use super::{ConnectionState, ExchangeAdapter, ExchangeEvent};
use crate::error::{LivermoreError, Result};
use crate::types::{Candle, Timeframe};

pub struct StubAdapter {
    exchange_id: i32,
    exchange_name: &'static str,
}

impl StubAdapter {
    pub fn new(exchange_id: i32, exchange_name: &'static str) -> Self {
        Self { exchange_id, exchange_name }
    }

    fn not_implemented(&self) -> LivermoreError {
        LivermoreError::Transient {
            exchange: self.exchange_name.to_string(),
            source: anyhow::anyhow!("adapter not yet wired for {}", self.exchange_name),
        }
    }
}

#[async_trait]
impl ExchangeAdapter for StubAdapter {
    fn exchange_id(&self) -> i32 {
        self.exchange_id
    }

    fn exchange_name(&self) -> &str {
        self.exchange_name
    }

    async fn connect(&mut self) -> Result<()> {
        Err(self.not_implemented())
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&mut self, _symbols: &[String], _timeframes: &[Timeframe]) -> Result<()> {
        Err(self.not_implemented())
    }

    async fn unsubscribe(&mut self, _symbols: &[String]) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        false
    }

    async fn next_event(&mut self) -> Result<ExchangeEvent> {
        Err(self.not_implemented())
    }

    async fn fetch_recent_candles(&self, _symbol: &str, _timeframe: Timeframe, _limit: u32) -> Result<Vec<Candle>> {
        Err(self.not_implemented())
    }
}

/// Never reaches `Connected`; exists so the connection-state machine has
/// somewhere consistent to park an unimplemented exchange.
pub const STUB_STATE: ConnectionState = ConnectionState::Disconnected;

//! Kraken adapter — generalized from the teacher's `KrakenIngester`
//! (trade-channel WebSocket parsing) into the abstract `ExchangeAdapter`
//! shape, with trades fed through the shared multi-timeframe aggregator
//! instead of being handed to the caller as raw ticks.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

use super::aggregator::MultiTimeframeAggregator;
use super::{ConnectionState, ExchangeAdapter, ExchangeEvent, SubscriptionSet};
use crate::error::{LivermoreError, Result};
use crate::types::{Candle, Ticker, Timeframe};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct KrakenAdapter {
    exchange_id: i32,
    ws_url: String,
    rest_url: String,
    http: reqwest::Client,
    ws: Option<WsStream>,
    state: ConnectionState,
    subscriptions: SubscriptionSet,
    aggregator: MultiTimeframeAggregator,
    pending: VecDeque<ExchangeEvent>,
    sequence: i64,
}

impl KrakenAdapter {
    pub fn new(exchange_id: i32, ws_url: String, rest_url: String, timeframes: Vec<Timeframe>) -> Self {
        Self {
            exchange_id,
            ws_url,
            rest_url,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds with static config"),
            ws: None,
            state: ConnectionState::Disconnected,
            subscriptions: SubscriptionSet::new(),
            aggregator: MultiTimeframeAggregator::new(exchange_id, timeframes),
            pending: VecDeque::new(),
            sequence: 0,
        }
    }

    fn to_kraken_pair(symbol: &str) -> String {
        match symbol {
            "BTC-USD" | "BTCUSD" => "XBT/USD".to_string(),
            "ETH-USD" | "ETHUSD" => "ETH/USD".to_string(),
            other if other.contains('-') => other.replacen('-', "/", 1),
            other => other.to_string(),
        }
    }

    fn parse_trade_message(&mut self, data: &serde_json::Value) -> Vec<ExchangeEvent> {
        let mut events = Vec::new();
        let Some(trades) = data.get(1).and_then(|v| v.as_array()) else {
            return events;
        };
        let Some(pair) = data.get(3).and_then(|v| v.as_str()) else {
            return events;
        };
        let symbol = pair.replace('/', "-");

        for trade in trades {
            let Some(fields) = trade.as_array() else { continue };
            let (Some(price_s), Some(vol_s), Some(ts)) = (
                fields.first().and_then(|v| v.as_str()),
                fields.get(1).and_then(|v| v.as_str()),
                fields.get(2).and_then(|v| v.as_f64()),
            ) else {
                continue;
            };
            let (Ok(price), Ok(volume)) = (price_s.parse::<Decimal>(), vol_s.parse::<Decimal>()) else {
                continue;
            };
            let time = match DateTime::<Utc>::from_timestamp(ts as i64, ((ts.fract()) * 1e9) as u32) {
                Some(t) => t,
                None => continue,
            };

            self.sequence += 1;
            events.push(ExchangeEvent::TickerUpdate {
                symbol: symbol.clone(),
                ticker: Ticker {
                    price,
                    volume_24h: Decimal::ZERO,
                    updated_at: time,
                },
            });

            for candle in self.aggregator.on_trade(&symbol, price, volume, time, self.sequence) {
                events.push(ExchangeEvent::CandleClose(candle));
            }
        }

        events
    }
}

#[async_trait]
impl ExchangeAdapter for KrakenAdapter {
    fn exchange_id(&self) -> i32 {
        self.exchange_id
    }

    fn exchange_name(&self) -> &str {
        "kraken"
    }

    async fn connect(&mut self) -> Result<()> {
        self.state = ConnectionState::Connecting;
        let (ws, _) = connect_async(&self.ws_url)
            .await
            .map_err(|e| LivermoreError::Transient {
                exchange: "kraken".into(),
                source: e.into(),
            })?;
        self.ws = Some(ws);
        self.state = ConnectionState::Connected;
        info!("kraken websocket connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.state = ConnectionState::Disconnecting;
        if let Some(mut ws) = self.ws.take() {
            let _ = ws.close(None).await;
        }
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    async fn subscribe(&mut self, symbols: &[String], _timeframes: &[Timeframe]) -> Result<()> {
        self.subscriptions.add(symbols).await;
        let all = self.subscriptions.snapshot().await;
        if all.is_empty() {
            return Ok(());
        }
        let Some(ws) = self.ws.as_mut() else {
            return Ok(());
        };
        let pairs: Vec<String> = all.iter().map(|s| Self::to_kraken_pair(s)).collect();
        let msg = json!({
            "event": "subscribe",
            "pair": pairs,
            "subscription": { "name": "trade" },
        });
        ws.send(Message::Text(msg.to_string()))
            .await
            .map_err(|e| LivermoreError::Transient {
                exchange: "kraken".into(),
                source: e.into(),
            })?;
        Ok(())
    }

    async fn unsubscribe(&mut self, symbols: &[String]) -> Result<()> {
        self.subscriptions.remove(symbols).await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    async fn next_event(&mut self) -> Result<ExchangeEvent> {
        if let Some(ev) = self.pending.pop_front() {
            return Ok(ev);
        }

        loop {
            let Some(ws) = self.ws.as_mut() else {
                return Err(LivermoreError::Transient {
                    exchange: "kraken".into(),
                    source: anyhow::anyhow!("no active websocket"),
                });
            };

            let msg = tokio::time::timeout(super::WS_IDLE_TIMEOUT, ws.next())
                .await
                .map_err(|_| LivermoreError::Transient {
                    exchange: "kraken".into(),
                    source: anyhow::anyhow!("idle timeout"),
                })?
                .ok_or_else(|| LivermoreError::Transient {
                    exchange: "kraken".into(),
                    source: anyhow::anyhow!("stream ended"),
                })?
                .map_err(|e| LivermoreError::Transient {
                    exchange: "kraken".into(),
                    source: e.into(),
                })?;

            match msg {
                Message::Text(text) => {
                    let Ok(data) = serde_json::from_str::<serde_json::Value>(&text) else {
                        continue;
                    };
                    if data.get("event").is_some() {
                        continue; // status/heartbeat message, not trade data
                    }
                    let mut events = self.parse_trade_message(&data);
                    if events.is_empty() {
                        continue;
                    }
                    let first = events.remove(0);
                    self.pending.extend(events);
                    return Ok(first);
                }
                Message::Close(_) => {
                    return Err(LivermoreError::Transient {
                        exchange: "kraken".into(),
                        source: anyhow::anyhow!("websocket closed by peer"),
                    });
                }
                _ => continue,
            }
        }
    }

    async fn fetch_recent_candles(&self, symbol: &str, timeframe: Timeframe, limit: u32) -> Result<Vec<Candle>> {
        let pair = Self::to_kraken_pair(symbol);
        let interval_minutes = match timeframe {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        };

        let url = format!("{}/0/public/OHLC", self.rest_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("pair", pair.as_str()), ("interval", &interval_minutes.to_string())])
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LivermoreError::RateLimited {
                exchange: "kraken".into(),
                retry_after_ms: None,
            });
        }
        if resp.status().as_u16() == 451 {
            return Err(LivermoreError::GeoRestricted { exchange: "kraken".into() });
        }

        let body: serde_json::Value = resp.json().await?;
        let result = body.get("result").cloned().unwrap_or_default();
        let Some(obj) = result.as_object() else {
            return Ok(Vec::new());
        };

        let rows = obj
            .iter()
            .find(|(k, _)| *k != "last")
            .map(|(_, v)| v.clone())
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();

        let mut candles: Vec<Candle> = rows
            .iter()
            .filter_map(|row| {
                let arr = row.as_array()?;
                let ts = arr.first()?.as_i64()?;
                let open: Decimal = arr.get(1)?.as_str()?.parse().ok()?;
                let high: Decimal = arr.get(2)?.as_str()?.parse().ok()?;
                let low: Decimal = arr.get(3)?.as_str()?.parse().ok()?;
                let close: Decimal = arr.get(4)?.as_str()?.parse().ok()?;
                let volume: Decimal = arr.get(6)?.as_str()?.parse().ok()?;
                Some(Candle {
                    exchange_id: self.exchange_id,
                    symbol: symbol.to_string(),
                    timeframe,
                    timestamp_ms: ts * 1000,
                    open,
                    high,
                    low,
                    close,
                    volume,
                    sequence_num: ts,
                })
            })
            .collect();

        candles.sort_by_key(|c| c.timestamp_ms);
        let len = candles.len();
        if len as u32 > limit {
            candles.drain(0..(len - limit as usize));
        }
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_translation_handles_known_aliases() {
        assert_eq!(KrakenAdapter::to_kraken_pair("BTC-USD"), "XBT/USD");
        assert_eq!(KrakenAdapter::to_kraken_pair("ETH-USD"), "ETH/USD");
        assert_eq!(KrakenAdapter::to_kraken_pair("SOL-USD"), "SOL/USD");
    }
}

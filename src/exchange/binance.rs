//! Binance (and Binance US, same wire shape, different base URLs)
//! adapter: combined-stream WebSocket for `@trade`, REST `/klines` for
//! backfill.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::info;

use super::aggregator::MultiTimeframeAggregator;
use super::{ConnectionState, ExchangeAdapter, ExchangeEvent, SubscriptionSet};
use crate::error::{LivermoreError, Result};
use crate::types::{Candle, Ticker, Timeframe};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Deserialize)]
struct TradePayload {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    trade_time_ms: i64,
    #[serde(rename = "t")]
    trade_id: i64,
}

#[derive(Debug, Deserialize)]
struct CombinedStreamMessage {
    #[allow(dead_code)]
    stream: String,
    data: TradePayload,
}

pub struct BinanceAdapter {
    exchange_id: i32,
    exchange_name: &'static str,
    ws_base_url: String,
    rest_url: String,
    http: reqwest::Client,
    ws: Option<WsStream>,
    state: ConnectionState,
    subscriptions: SubscriptionSet,
    aggregator: MultiTimeframeAggregator,
    pending: VecDeque<ExchangeEvent>,
}

impl BinanceAdapter {
    pub fn new(
        exchange_id: i32,
        exchange_name: &'static str,
        ws_base_url: String,
        rest_url: String,
        timeframes: Vec<Timeframe>,
    ) -> Self {
        Self {
            exchange_id,
            exchange_name,
            ws_base_url,
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
        }
    }

    fn stream_url(&self, symbols: &[String]) -> String {
        let streams: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}@trade", s.to_lowercase().replace('-', "")))
            .collect();
        format!("{}/stream?streams={}", self.ws_base_url, streams.join("/"))
    }

    fn parse_message(&mut self, text: &str) -> Vec<ExchangeEvent> {
        let Ok(msg) = serde_json::from_str::<CombinedStreamMessage>(text) else {
            return Vec::new();
        };
        let trade = msg.data;
        let (Ok(price), Ok(quantity)) = (trade.price.parse::<Decimal>(), trade.quantity.parse::<Decimal>()) else {
            return Vec::new();
        };
        let Some(time) = DateTime::<Utc>::from_timestamp_millis(trade.trade_time_ms) else {
            return Vec::new();
        };

        let mut events = vec![ExchangeEvent::TickerUpdate {
            symbol: trade.symbol.clone(),
            ticker: Ticker {
                price,
                volume_24h: Decimal::ZERO,
                updated_at: time,
            },
        }];

        for candle in self
            .aggregator
            .on_trade(&trade.symbol, price, quantity, time, trade.trade_id)
        {
            events.push(ExchangeEvent::CandleClose(candle));
        }
        events
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn exchange_id(&self) -> i32 {
        self.exchange_id
    }

    fn exchange_name(&self) -> &str {
        self.exchange_name
    }

    async fn connect(&mut self) -> Result<()> {
        self.state = ConnectionState::Connecting;
        let symbols = self.subscriptions.snapshot().await;
        let url = if symbols.is_empty() {
            format!("{}/stream?streams=btcusdt@trade", self.ws_base_url)
        } else {
            self.stream_url(&symbols)
        };
        let (ws, _) = connect_async(&url).await.map_err(|e| LivermoreError::Transient {
            exchange: self.exchange_name.to_string(),
            source: e.into(),
        })?;
        self.ws = Some(ws);
        self.state = ConnectionState::Connected;
        info!(exchange = self.exchange_name, "binance-family websocket connected");
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
        // Binance's combined-stream WS requires re-connecting with the new
        // stream list in the URL; callers reconnect via run_with_reconnect
        // after the subscription set changes.
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
                    exchange: self.exchange_name.to_string(),
                    source: anyhow::anyhow!("no active websocket"),
                });
            };

            let msg = tokio::time::timeout(super::WS_IDLE_TIMEOUT, ws.next())
                .await
                .map_err(|_| LivermoreError::Transient {
                    exchange: self.exchange_name.to_string(),
                    source: anyhow::anyhow!("idle timeout"),
                })?
                .ok_or_else(|| LivermoreError::Transient {
                    exchange: self.exchange_name.to_string(),
                    source: anyhow::anyhow!("stream ended"),
                })?
                .map_err(|e| LivermoreError::Transient {
                    exchange: self.exchange_name.to_string(),
                    source: e.into(),
                })?;

            match msg {
                Message::Text(text) => {
                    let mut events = self.parse_message(&text);
                    if events.is_empty() {
                        continue;
                    }
                    let first = events.remove(0);
                    self.pending.extend(events);
                    return Ok(first);
                }
                Message::Close(_) => {
                    return Err(LivermoreError::Transient {
                        exchange: self.exchange_name.to_string(),
                        source: anyhow::anyhow!("websocket closed by peer"),
                    });
                }
                _ => continue,
            }
        }
    }

    async fn fetch_recent_candles(&self, symbol: &str, timeframe: Timeframe, limit: u32) -> Result<Vec<Candle>> {
        let interval = match timeframe {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        };
        let binance_symbol = symbol.to_uppercase().replace('-', "");
        let url = format!("{}/api/v3/klines", self.rest_url);

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("symbol", binance_symbol.as_str()),
                ("interval", interval),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await?;

        match resp.status() {
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                return Err(LivermoreError::RateLimited {
                    exchange: self.exchange_name.to_string(),
                    retry_after_ms: resp
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(|s| s * 1000),
                });
            }
            status if status.as_u16() == 451 => {
                return Err(LivermoreError::GeoRestricted {
                    exchange: self.exchange_name.to_string(),
                });
            }
            _ => {}
        }

        // Each row: [open_time, open, high, low, close, volume, close_time, ...]
        let rows: Vec<serde_json::Value> = resp.json().await?;
        let candles: Vec<Candle> = rows
            .iter()
            .filter_map(|row| {
                let arr = row.as_array()?;
                let open_time = arr.first()?.as_i64()?;
                Some(Candle {
                    exchange_id: self.exchange_id,
                    symbol: symbol.to_string(),
                    timeframe,
                    timestamp_ms: open_time,
                    open: arr.get(1)?.as_str()?.parse().ok()?,
                    high: arr.get(2)?.as_str()?.parse().ok()?,
                    low: arr.get(3)?.as_str()?.parse().ok()?,
                    close: arr.get(4)?.as_str()?.parse().ok()?,
                    volume: arr.get(5)?.as_str()?.parse().ok()?,
                    sequence_num: open_time,
                })
            })
            .collect();
        Ok(candles)
    }
}

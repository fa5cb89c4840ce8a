//! Coinbase Advanced Trade adapter: WS `market_trades` channel for the
//! live feed, REST `/candles` for backfill. Trades are funneled through
//! the shared aggregator to produce candle-close events, mirroring how
//! the teacher's ingesters convert exchange-native messages into typed
//! ticks before anything else touches them.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::info;

use super::aggregator::MultiTimeframeAggregator;
use super::{ConnectionState, ExchangeAdapter, ExchangeEvent, SubscriptionSet};
use crate::error::{LivermoreError, Result};
use crate::types::{Candle, Ticker, Timeframe};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Deserialize)]
struct TradeEvent {
    trade_id: String,
    product_id: String,
    price: String,
    size: String,
    time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct MarketTradesMessage {
    channel: String,
    events: Vec<MarketTradesEvent>,
}

#[derive(Debug, Deserialize)]
struct MarketTradesEvent {
    #[serde(default)]
    trades: Vec<TradeEvent>,
}

pub struct CoinbaseAdapter {
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

impl CoinbaseAdapter {
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

    fn parse_message(&mut self, text: &str) -> Vec<ExchangeEvent> {
        let Ok(msg) = serde_json::from_str::<MarketTradesMessage>(text) else {
            return Vec::new();
        };
        if msg.channel != "market_trades" {
            return Vec::new();
        }

        let mut events = Vec::new();
        for batch in msg.events {
            for trade in batch.trades {
                let (Ok(price), Ok(size)) = (trade.price.parse::<Decimal>(), trade.size.parse::<Decimal>()) else {
                    continue;
                };
                self.sequence += 1;

                events.push(ExchangeEvent::TickerUpdate {
                    symbol: trade.product_id.clone(),
                    ticker: Ticker {
                        price,
                        volume_24h: Decimal::ZERO,
                        updated_at: trade.time,
                    },
                });

                for candle in self
                    .aggregator
                    .on_trade(&trade.product_id, price, size, trade.time, self.sequence)
                {
                    events.push(ExchangeEvent::CandleClose(candle));
                }
            }
        }
        events
    }
}

#[async_trait]
impl ExchangeAdapter for CoinbaseAdapter {
    fn exchange_id(&self) -> i32 {
        self.exchange_id
    }

    fn exchange_name(&self) -> &str {
        "coinbase"
    }

    async fn connect(&mut self) -> Result<()> {
        self.state = ConnectionState::Connecting;
        let (ws, _) = connect_async(&self.ws_url)
            .await
            .map_err(|e| LivermoreError::Transient {
                exchange: "coinbase".into(),
                source: e.into(),
            })?;
        self.ws = Some(ws);
        self.state = ConnectionState::Connected;
        info!("coinbase websocket connected");
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
        let msg = json!({
            "type": "subscribe",
            "product_ids": all,
            "channel": "market_trades",
        });
        ws.send(Message::Text(msg.to_string()))
            .await
            .map_err(|e| LivermoreError::Transient {
                exchange: "coinbase".into(),
                source: e.into(),
            })?;
        Ok(())
    }

    async fn unsubscribe(&mut self, symbols: &[String]) -> Result<()> {
        self.subscriptions.remove(symbols).await;
        if let Some(ws) = self.ws.as_mut() {
            let msg = json!({
                "type": "unsubscribe",
                "product_ids": symbols,
                "channel": "market_trades",
            });
            let _ = ws.send(Message::Text(msg.to_string())).await;
        }
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
                    exchange: "coinbase".into(),
                    source: anyhow::anyhow!("no active websocket"),
                });
            };

            let msg = tokio::time::timeout(super::WS_IDLE_TIMEOUT, ws.next())
                .await
                .map_err(|_| LivermoreError::Transient {
                    exchange: "coinbase".into(),
                    source: anyhow::anyhow!("idle timeout"),
                })?
                .ok_or_else(|| LivermoreError::Transient {
                    exchange: "coinbase".into(),
                    source: anyhow::anyhow!("stream ended"),
                })?
                .map_err(|e| LivermoreError::Transient {
                    exchange: "coinbase".into(),
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
                        exchange: "coinbase".into(),
                        source: anyhow::anyhow!("websocket closed by peer"),
                    });
                }
                _ => continue,
            }
        }
    }

    async fn fetch_recent_candles(&self, symbol: &str, timeframe: Timeframe, limit: u32) -> Result<Vec<Candle>> {
        let granularity = match timeframe {
            Timeframe::M1 => "ONE_MINUTE",
            Timeframe::M5 => "FIVE_MINUTE",
            Timeframe::M15 => "FIFTEEN_MINUTE",
            Timeframe::M30 => "THIRTY_MINUTE",
            Timeframe::H1 => "ONE_HOUR",
            Timeframe::H4 => "FOUR_HOUR",
            Timeframe::D1 => "ONE_DAY",
        };

        let end = Utc::now();
        let start = end - chrono::Duration::milliseconds(timeframe.duration_ms() * limit as i64);
        let url = format!("{}/products/{}/candles", self.rest_url, symbol);

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("start", start.timestamp().to_string()),
                ("end", end.timestamp().to_string()),
                ("granularity", granularity.to_string()),
            ])
            .send()
            .await?;

        match resp.status() {
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                return Err(LivermoreError::RateLimited {
                    exchange: "coinbase".into(),
                    retry_after_ms: None,
                });
            }
            status if status.as_u16() == 451 => {
                return Err(LivermoreError::GeoRestricted { exchange: "coinbase".into() });
            }
            status if status == reqwest::StatusCode::UNAUTHORIZED => {
                return Err(LivermoreError::AuthFailed { exchange: "coinbase".into() });
            }
            _ => {}
        }

        #[derive(Deserialize)]
        struct CandleRow {
            start: String,
            low: String,
            high: String,
            open: String,
            close: String,
            volume: String,
        }
        #[derive(Deserialize)]
        struct CandlesResponse {
            candles: Vec<CandleRow>,
        }

        let body: CandlesResponse = resp.json().await?;
        let mut candles: Vec<Candle> = body
            .candles
            .iter()
            .filter_map(|row| {
                let ts: i64 = row.start.parse().ok()?;
                Some(Candle {
                    exchange_id: self.exchange_id,
                    symbol: symbol.to_string(),
                    timeframe,
                    timestamp_ms: ts * 1000,
                    open: row.open.parse().ok()?,
                    high: row.high.parse().ok()?,
                    low: row.low.parse().ok()?,
                    close: row.close.parse().ok()?,
                    volume: row.volume.parse().ok()?,
                    sequence_num: ts,
                })
            })
            .collect();

        candles.sort_by_key(|c| c.timestamp_ms);
        Ok(candles)
    }
}

//! Alert Evaluator (§4.J). One evaluator per running exchange instance;
//! carries the "previous value" state in process memory since the
//! indicator cache itself only retains the latest value per key.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::{error, info};

use super::rules::TriggerRule;
use crate::error::Result;
use crate::redis_handle::RedisHandle;
use crate::types::{IndicatorValue, Timeframe};

/// External notification dispatch (Discord, etc.) — best-effort, never
/// on the alert-persistence critical path.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, alert_type: &str, symbol: &str, trigger_label: &str) -> anyhow::Result<()>;
}

type PreviousKey = (String, Timeframe, String);

pub struct AlertEvaluator {
    exchange_id: i32,
    exchange_name: String,
    pg_pool: sqlx::PgPool,
    redis: RedisHandle,
    rules: Vec<Box<dyn TriggerRule>>,
    previous: Arc<RwLock<HashMap<PreviousKey, IndicatorValue>>>,
    notifier: Option<Arc<dyn NotificationSink>>,
}

impl AlertEvaluator {
    pub fn new(
        exchange_id: i32,
        exchange_name: String,
        pg_pool: sqlx::PgPool,
        redis: RedisHandle,
        rules: Vec<Box<dyn TriggerRule>>,
        notifier: Option<Arc<dyn NotificationSink>>,
    ) -> Self {
        Self {
            exchange_id,
            exchange_name,
            pg_pool,
            redis,
            rules,
            previous: Arc::new(RwLock::new(HashMap::new())),
            notifier,
        }
    }

    pub async fn evaluate(
        &self,
        exchange_id: i32,
        symbol: &str,
        timeframe: Timeframe,
        indicator_type: &str,
        current: &IndicatorValue,
        price: rust_decimal::Decimal,
    ) -> Result<()> {
        debug_assert_eq!(exchange_id, self.exchange_id, "evaluator is scoped to one exchange");

        let key: PreviousKey = (symbol.to_string(), timeframe, indicator_type.to_string());
        let previous = self.previous.read().await.get(&key).cloned();

        let draft = self.rules.iter().find_map(|rule| rule.evaluate(previous.as_ref(), current));

        self.previous.write().await.insert(key, current.clone());

        let Some(draft) = draft else { return Ok(()) };

        let triggered_at = Utc::now();
        let previous_label = previous.as_ref().map(|p| p.params.stage.clone());

        // §7: "Postgres unique-violation on alert -> idempotent insert path
        // ignores; no alert is fired twice." `alert_history` carries a unique
        // index on (exchange_id, symbol, timeframe, alert_type,
        // triggered_at_epoch) so a redundant evaluation of the same
        // indicator timestamp (streaming close + boundary recompute both
        // landing on the same candle) can't double-insert.
        let row: Option<(i64,)> = sqlx::query_as(
            "INSERT INTO alert_history
                (exchange_id, symbol, timeframe, alert_type, triggered_at, triggered_at_epoch,
                 price, trigger_value, trigger_label, previous_label, details, notification_sent, notification_error)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, false, NULL)
             ON CONFLICT (exchange_id, symbol, timeframe, alert_type, triggered_at_epoch) DO NOTHING
             RETURNING id",
        )
        .bind(self.exchange_id)
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(&draft.alert_type)
        .bind(triggered_at)
        .bind(triggered_at.timestamp())
        .bind(price)
        .bind(draft.trigger_value)
        .bind(&draft.trigger_label)
        .bind(previous_label)
        .bind(&draft.details)
        .fetch_optional(&self.pg_pool)
        .await
        .map_err(crate::error::LivermoreError::Postgres)?;

        let Some(row) = row else {
            info!(exchange_id = self.exchange_id, symbol, trigger_label = %draft.trigger_label, "duplicate alert suppressed by unique index");
            return Ok(());
        };

        let channel = crate::cache::keys::channel_alerts(self.exchange_id);
        let payload = serde_json::json!({
            "id": row.0,
            "source_exchange_id": self.exchange_id,
            "source_exchange_name": self.exchange_name,
            "symbol": symbol,
            "timeframe": timeframe.as_str(),
            "alert_type": draft.alert_type,
            "trigger_label": draft.trigger_label,
            "trigger_value": draft.trigger_value,
            "triggered_at": triggered_at,
        });
        let mut conn = self.redis.connection();
        let _: () = conn.publish(&channel, payload.to_string()).await?;

        info!(exchange_id = self.exchange_id, symbol, trigger_label = %draft.trigger_label, "alert fired");

        if let Some(notifier) = self.notifier.clone() {
            let alert_type = draft.alert_type.clone();
            let trigger_label = draft.trigger_label.clone();
            let symbol = symbol.to_string();
            tokio::spawn(async move {
                if let Err(e) = notifier.notify(&alert_type, &symbol, &trigger_label).await {
                    error!(error = %e, "alert notification dispatch failed");
                }
            });
        }

        Ok(())
    }
}

//! Activity stream (§3 Activity Entry, §4.K). A capped Redis Stream per
//! exchange recording state transitions and errors for operators to
//! tail without a full log aggregator.

use std::collections::HashMap;

use redis::AsyncCommands;

use crate::cache::keys;
use crate::error::Result;
use crate::redis_handle::RedisHandle;
use crate::types::ActivityEntry;

pub struct ActivityLog {
    redis: RedisHandle,
    exchange_id: i32,
}

impl ActivityLog {
    pub fn new(redis: RedisHandle, exchange_id: i32) -> Self {
        Self { redis, exchange_id }
    }

    pub async fn record_transition(
        &self,
        exchange_name: &str,
        hostname: &str,
        ip: &str,
        from_state: &str,
        to_state: &str,
    ) -> Result<()> {
        let mut fields = HashMap::new();
        fields.insert("from_state".to_string(), from_state.to_string());
        fields.insert("to_state".to_string(), to_state.to_string());
        self.append(ActivityEntry {
            event: "state_transition".to_string(),
            exchange_id: self.exchange_id.to_string(),
            exchange_name: exchange_name.to_string(),
            hostname: hostname.to_string(),
            ip: ip.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            fields,
        })
        .await
    }

    pub async fn record_error(
        &self,
        exchange_name: &str,
        hostname: &str,
        ip: &str,
        state: &str,
        error: &str,
    ) -> Result<()> {
        let mut fields = HashMap::new();
        fields.insert("state".to_string(), state.to_string());
        fields.insert("error".to_string(), error.to_string());
        self.append(ActivityEntry {
            event: "error".to_string(),
            exchange_id: self.exchange_id.to_string(),
            exchange_name: exchange_name.to_string(),
            hostname: hostname.to_string(),
            ip: ip.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            fields,
        })
        .await
    }

    async fn append(&self, entry: ActivityEntry) -> Result<()> {
        let key = keys::instance_activity(self.exchange_id);
        let mut conn = self.redis.connection();

        let mut items: Vec<(String, String)> = vec![
            ("event".to_string(), entry.event),
            ("exchange_id".to_string(), entry.exchange_id),
            ("exchange_name".to_string(), entry.exchange_name),
            ("hostname".to_string(), entry.hostname),
            ("ip".to_string(), entry.ip),
            ("timestamp".to_string(), entry.timestamp),
        ];
        items.extend(entry.fields);

        let _: String = conn
            .xadd_maxlen(
                &key,
                redis::streams::StreamMaxlen::Approx(keys::ACTIVITY_STREAM_MAXLEN),
                "*",
                &items,
            )
            .await?;
        Ok(())
    }
}

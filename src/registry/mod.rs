//! Instance Registry & FSM (§4.K): the single authority for one
//! exchange instance's connection state, heartbeat, and activity log.

pub mod activity;
pub mod fsm;
pub mod heartbeat;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::error;

use self::activity::ActivityLog;
use self::fsm::{ConnectionFsm, ConnectionState, Trigger};
use crate::error::Result;
use crate::redis_handle::RedisHandle;
use crate::types::{ConnectionStateLabel, InstanceStatus};

#[async_trait]
pub trait StateChangeNotifier: Send + Sync {
    async fn notify(&self, exchange_name: &str, from: ConnectionState, to: ConnectionState) -> anyhow::Result<()>;
}

pub struct InstanceRegistry {
    redis: RedisHandle,
    fsm: ConnectionFsm,
    activity: ActivityLog,
    notifier: Option<Arc<dyn StateChangeNotifier>>,
    exchange_id: i32,
    exchange_name: String,
    hostname: String,
    ip: String,
    admin_email: Option<String>,
    admin_display_name: Option<String>,
    registered_at: DateTime<Utc>,
    connected_at: Mutex<Option<DateTime<Utc>>>,
    last_state_change: Mutex<DateTime<Utc>>,
    last_error: Mutex<Option<String>>,
    symbol_count: AtomicU32,
}

impl InstanceRegistry {
    pub fn new(
        redis: RedisHandle,
        exchange_id: i32,
        exchange_name: String,
        hostname: String,
        ip: String,
        admin_email: Option<String>,
        admin_display_name: Option<String>,
        notifier: Option<Arc<dyn StateChangeNotifier>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            activity: ActivityLog::new(redis.clone(), exchange_id),
            redis,
            fsm: ConnectionFsm::new(),
            notifier,
            exchange_id,
            exchange_name,
            hostname,
            ip,
            admin_email,
            admin_display_name,
            registered_at: now,
            connected_at: Mutex::new(None),
            last_state_change: Mutex::new(now),
            last_error: Mutex::new(None),
            symbol_count: AtomicU32::new(0),
        }
    }

    pub async fn current_state(&self) -> ConnectionState {
        self.fsm.current().await
    }

    pub fn set_symbol_count(&self, n: u32) {
        self.symbol_count.store(n, Ordering::Relaxed);
    }

    /// Applies an FSM trigger and, for every non-reset transition,
    /// records the activity entry and fires the optional notification
    /// (§4.K — resets are silent).
    pub async fn transition(&self, trigger: Trigger) -> Result<()> {
        let (from, to, notify) = self.fsm.apply(trigger).await?;
        *self.last_state_change.lock().await = Utc::now();

        if to == ConnectionState::Warming {
            *self.connected_at.lock().await = Some(Utc::now());
        }

        if notify {
            if let Err(e) = self
                .activity
                .record_transition(&self.exchange_name, &self.hostname, &self.ip, &format!("{from:?}"), &format!("{to:?}"))
                .await
            {
                error!(exchange_id = self.exchange_id, error = %e, "failed recording activity transition");
            }

            if let Some(notifier) = self.notifier.clone() {
                let exchange_name = self.exchange_name.clone();
                tokio::spawn(async move {
                    if let Err(e) = notifier.notify(&exchange_name, from, to).await {
                        error!(error = %e, "state transition notification failed");
                    }
                });
            }
        }

        Ok(())
    }

    pub async fn record_error(&self, message: &str) -> Result<()> {
        *self.last_error.lock().await = Some(message.to_string());
        let state = self.fsm.current().await;
        self.activity
            .record_error(&self.exchange_name, &self.hostname, &self.ip, &format!("{state:?}"), message)
            .await
    }

    fn label(state: ConnectionState) -> ConnectionStateLabel {
        match state {
            ConnectionState::Idle => ConnectionStateLabel::Idle,
            ConnectionState::Starting => ConnectionStateLabel::Starting,
            ConnectionState::Warming => ConnectionStateLabel::Warming,
            ConnectionState::Active => ConnectionStateLabel::Active,
            ConnectionState::Stopping => ConnectionStateLabel::Stopping,
            ConnectionState::Stopped => ConnectionStateLabel::Stopped,
        }
    }

    /// Builds the status snapshot the heartbeat loop writes every 15s.
    pub async fn snapshot(&self) -> InstanceStatus {
        InstanceStatus {
            exchange_id: self.exchange_id,
            exchange_name: self.exchange_name.clone(),
            hostname: self.hostname.clone(),
            ip: self.ip.clone(),
            admin_email: self.admin_email.clone(),
            admin_display_name: self.admin_display_name.clone(),
            connection_state: Self::label(self.fsm.current().await),
            symbol_count: self.symbol_count.load(Ordering::Relaxed),
            connected_at: *self.connected_at.lock().await,
            last_heartbeat: Utc::now(),
            last_state_change: *self.last_state_change.lock().await,
            registered_at: self.registered_at,
            last_error: self.last_error.lock().await.clone(),
        }
    }

    pub fn redis(&self) -> RedisHandle {
        self.redis.clone()
    }

    pub fn exchange_id(&self) -> i32 {
        self.exchange_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reset_to_idle_skips_activity_and_notifier_but_still_records_error_independently() {
        // This only exercises the FSM/bookkeeping side; Redis calls in
        // `transition`/`record_error` are integration-level concerns
        // covered by the trust/scanner/writer unit tests against a real
        // connection manager.
        let fsm = ConnectionFsm::new();
        let (_, to, notify) = fsm.apply(Trigger::ResetToIdle).await.unwrap();
        assert_eq!(to, ConnectionState::Idle);
        assert!(!notify);
    }
}

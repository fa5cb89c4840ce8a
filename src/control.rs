//! Control Channel (§4.L). Subscribes to one user's command channel and
//! serialises handling so FSM transitions stay deterministic — only one
//! command is ever in flight for this instance at a time.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cache::keys;
use crate::error::{LivermoreError, Result};
use crate::redis_handle::RedisHandle;
use crate::registry::fsm::Trigger;
use crate::registry::InstanceRegistry;
use crate::types::Timeframe;

#[derive(Debug, Deserialize)]
struct CommandEnvelope {
    correlation_id: String,
    #[serde(rename = "type")]
    command_type: String,
    payload: serde_json::Value,
    #[allow(dead_code)]
    timestamp: i64,
    #[allow(dead_code)]
    priority: Option<i32>,
}

#[derive(Debug, Serialize)]
struct CommandResult {
    correlation_id: String,
    success: bool,
    error: Option<String>,
    /// Stable, machine-readable identifier for the rejection (§7: "Reject
    /// command with `invalid_transition`"). `None` for anything the
    /// caller isn't expected to match on programmatically; `error`
    /// still carries the free-text message for humans.
    code: Option<&'static str>,
}

/// Maps a library-layer error to the stable code a caller can match on,
/// mirroring `api/envelope.rs::ApiError`'s `{code, message}` split for
/// the HTTP API. Errors with no stable code surface `error` only.
fn stable_error_code(err: &anyhow::Error) -> Option<&'static str> {
    match err.downcast_ref::<LivermoreError>() {
        Some(LivermoreError::InvalidTransition { .. }) => Some("invalid_transition"),
        _ => None,
    }
}

/// Side effects a command has beyond the FSM transition itself —
/// kept behind a trait so the control channel never depends on adapter
/// or warmup internals directly.
#[async_trait]
pub trait ControlActions: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;
    async fn add_symbol(&self, symbol: &str) -> anyhow::Result<()>;
    async fn bulk_add_symbols(&self, symbols: &[String]) -> anyhow::Result<()>;
    async fn force_backfill(&self, symbol: &str, timeframe: Timeframe) -> anyhow::Result<()>;
}

pub struct ControlChannel {
    redis: RedisHandle,
    user_id: String,
    registry: std::sync::Arc<InstanceRegistry>,
    actions: std::sync::Arc<dyn ControlActions>,
    in_flight: Mutex<()>,
}

impl ControlChannel {
    pub fn new(
        redis: RedisHandle,
        user_id: String,
        registry: std::sync::Arc<InstanceRegistry>,
        actions: std::sync::Arc<dyn ControlActions>,
    ) -> Self {
        Self { redis, user_id, registry, actions, in_flight: Mutex::new(()) }
    }

    pub async fn run(&self, mut cancel: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        let mut pubsub = self.redis.pubsub().await?;
        pubsub.subscribe(keys::commands(&self.user_id)).await?;
        let mut stream = pubsub.on_message();

        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        return Ok(());
                    }
                }
                msg = stream.next() => {
                    let Some(msg) = msg else { return Ok(()) };
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(error = %e, "command payload not a string");
                            continue;
                        }
                    };
                    self.dispatch(&payload).await;
                }
            }
        }
    }

    /// Emulates receiving a `start` command, for `--autostart` (§4.L).
    pub async fn autostart(&self) {
        let envelope = serde_json::json!({
            "correlation_id": "autostart",
            "type": "start",
            "payload": {},
            "timestamp": chrono::Utc::now().timestamp_millis(),
            "priority": 0,
        });
        self.dispatch(&envelope.to_string()).await;
    }

    async fn dispatch(&self, payload: &str) {
        let _guard = self.in_flight.lock().await;

        let envelope: CommandEnvelope = match serde_json::from_str(payload) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "malformed command envelope");
                return;
            }
        };

        let result = self.handle(&envelope).await;
        let (success, error, code) = match result {
            Ok(()) => (true, None, None),
            Err(e) => {
                let code = stable_error_code(&e);
                (false, Some(e.to_string()), code)
            }
        };

        if let Err(e) = self.publish_result(&envelope.correlation_id, success, error, code).await {
            warn!(error = %e, "failed publishing command result");
        }
    }

    async fn handle(&self, envelope: &CommandEnvelope) -> anyhow::Result<()> {
        info!(command_type = %envelope.command_type, correlation_id = %envelope.correlation_id, "control command received");

        match envelope.command_type.as_str() {
            "start" => {
                self.registry.transition(Trigger::Start).await?;
                self.actions.start().await
            }
            "stop" => {
                self.registry.transition(Trigger::Stop).await?;
                self.actions.stop().await
            }
            "add-symbol" => {
                let symbol = envelope
                    .payload
                    .get("symbol")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("add-symbol requires payload.symbol"))?;
                self.actions.add_symbol(symbol).await
            }
            "bulk-add-symbols" => {
                let symbols: Vec<String> = envelope
                    .payload
                    .get("symbols")
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| anyhow::anyhow!("bulk-add-symbols requires payload.symbols"))?
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                self.actions.bulk_add_symbols(&symbols).await
            }
            "force-backfill" => {
                let symbol = envelope
                    .payload
                    .get("symbol")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("force-backfill requires payload.symbol"))?;
                let timeframe = envelope
                    .payload
                    .get("timeframe")
                    .and_then(|v| v.as_str())
                    .and_then(Timeframe::parse)
                    .ok_or_else(|| anyhow::anyhow!("force-backfill requires a valid payload.timeframe"))?;
                self.actions.force_backfill(symbol, timeframe).await
            }
            "reset" => {
                self.registry.transition(Trigger::ResetToIdle).await?;
                Ok(())
            }
            other => Err(anyhow::anyhow!("unknown command type: {other}")),
        }
    }

    async fn publish_result(&self, correlation_id: &str, success: bool, error: Option<String>, code: Option<&'static str>) -> Result<()> {
        let result = CommandResult { correlation_id: correlation_id.to_string(), success, error, code };
        let body = serde_json::to_string(&result)?;
        let mut conn = self.redis.connection();
        let _: () = conn.publish(keys::commands_response(&self.user_id), body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::fsm::ConnectionState;

    #[test]
    fn invalid_transition_maps_to_stable_code() {
        let err: anyhow::Error = LivermoreError::InvalidTransition { from: ConnectionState::Idle, to: ConnectionState::Active }.into();
        assert_eq!(stable_error_code(&err), Some("invalid_transition"));
    }

    #[test]
    fn other_errors_have_no_stable_code() {
        let err = anyhow::anyhow!("unknown command type: bogus");
        assert_eq!(stable_error_code(&err), None);
    }
}

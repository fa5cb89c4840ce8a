//! Discord webhook notifications (§4.J, §4.K). Best-effort only — both
//! call sites treat failures as loggable, never as a reason to fail the
//! alert or state transition that triggered them.

use async_trait::async_trait;

use crate::alert::NotificationSink;
use crate::registry::fsm::ConnectionState;
use crate::registry::StateChangeNotifier;

pub struct DiscordNotifier {
    webhook_url: String,
    http: reqwest::Client,
}

impl DiscordNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self { webhook_url, http: reqwest::Client::new() }
    }

    async fn send(&self, content: String) -> anyhow::Result<()> {
        self.http
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for DiscordNotifier {
    async fn notify(&self, alert_type: &str, symbol: &str, trigger_label: &str) -> anyhow::Result<()> {
        self.send(format!("**{alert_type}** on `{symbol}`: {trigger_label}")).await
    }
}

#[async_trait]
impl StateChangeNotifier for DiscordNotifier {
    async fn notify(&self, exchange_name: &str, from: ConnectionState, to: ConnectionState) -> anyhow::Result<()> {
        self.send(format!("`{exchange_name}` {from:?} -> {to:?}")).await
    }
}

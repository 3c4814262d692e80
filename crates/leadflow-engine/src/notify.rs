//! Notification routing — fire-and-forget messages to CRM users.
//!
//! Used when a campaign is created (Admin/Manager/Marketing roles) and for
//! operational announcements. Never required for scheduling correctness:
//! failures are logged and dropped.

use leadflow_core::config::NotifyConfig;
use serde::{Deserialize, Serialize};

/// A notification addressed to a user role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Target role or user id.
    pub recipient: String,
    /// Notification type tag ("campaign_created", ...).
    pub kind: String,
    pub title: String,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// In-memory notification router with a bounded history.
#[derive(Default)]
pub struct NotifyRouter {
    history: Vec<Notification>,
    /// Optional webhook forwarded to in addition to the history.
    webhook_url: Option<String>,
}

impl NotifyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_webhook(url: &str) -> Self {
        Self {
            history: Vec::new(),
            webhook_url: Some(url.to_string()),
        }
    }

    /// Router wired from the `[notify]` config block.
    pub fn from_config(config: &NotifyConfig) -> Self {
        Self {
            history: Vec::new(),
            webhook_url: config.webhook_url.clone(),
        }
    }

    /// Record and forward a notification. Fire-and-forget: webhook failures
    /// are logged, never propagated.
    pub async fn notify(&mut self, recipient: &str, kind: &str, title: &str, message: &str) {
        let notification = Notification {
            recipient: recipient.to_string(),
            kind: kind.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            timestamp: chrono::Utc::now(),
        };

        if let Some(url) = &self.webhook_url
            && let Err(e) = post_webhook(url, &notification).await
        {
            tracing::warn!("⚠️ Notification webhook failed: {e}");
        }

        self.history.push(notification);
        // Ring buffer — keep last 100.
        if self.history.len() > 100 {
            self.history.remove(0);
        }
    }

    /// Announce a newly created campaign to the configured roles.
    pub async fn campaign_created(&mut self, campaign_name: &str, roles: &[String]) {
        for role in roles {
            self.notify(
                role,
                "campaign_created",
                "New campaign",
                &format!("Campaign '{campaign_name}' was created"),
            )
            .await;
        }
    }

    pub fn history(&self) -> &[Notification] {
        &self.history
    }
}

async fn post_webhook(url: &str, notification: &Notification) -> Result<(), String> {
    let client = reqwest::Client::new();
    let resp = client
        .post(url)
        .json(&serde_json::json!({
            "recipient": notification.recipient,
            "kind": notification.kind,
            "title": notification.title,
            "message": notification.message,
            "timestamp": notification.timestamp.to_rfc3339(),
        }))
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| format!("Webhook send failed: {e}"))?;

    if resp.status().is_success() {
        Ok(())
    } else {
        Err(format!("Webhook error {}", resp.status()))
    }
}

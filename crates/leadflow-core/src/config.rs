//! LeadFlow engine configuration.
//!
//! Loaded from TOML; every field has a default so a missing or partial file
//! still yields a runnable engine.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{EngineError, Result};

/// Root engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between scheduler ticks. The CRM runs hourly.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Minutes of slack around a campaign's send time. Absorbs tick jitter;
    /// shrink it if the tick interval is shortened.
    #[serde(default = "default_slack_mins")]
    pub send_window_slack_mins: i64,
    /// Whole-day threshold for Monthly frequency (fixed-day approximation,
    /// not calendar-month aware).
    #[serde(default = "default_monthly_days")]
    pub monthly_threshold_days: i64,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

fn default_tick_interval() -> u64 {
    3600
}
fn default_slack_mins() -> i64 {
    5
}
fn default_monthly_days() -> i64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            send_window_slack_mins: default_slack_mins(),
            monthly_threshold_days: default_monthly_days(),
            smtp: SmtpConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load config from a TOML file, falling back to defaults if it does not
    /// exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }
}

/// SMTP transport settings for the mail dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// From address campaigns are sent as.
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Per-send timeout in seconds.
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".into()
}
fn default_smtp_port() -> u16 {
    587
}
fn default_smtp_timeout() -> u64 {
    30
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            display_name: None,
            timeout_secs: default_smtp_timeout(),
        }
    }
}

/// Notification sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Optional webhook URL notified when campaigns are created.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Roles that receive campaign-created notifications.
    #[serde(default = "default_notify_roles")]
    pub roles: Vec<String>,
}

fn default_notify_roles() -> Vec<String> {
    vec!["Admin".into(), "Manager".into(), "Marketing".into()]
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            roles: default_notify_roles(),
        }
    }
}

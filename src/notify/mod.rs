// src/notify/mod.rs
//! Alert delivery channels. A `Notifier` delivers one message to one contact;
//! `dispatcher::ContactAlertDispatcher` fans an alert out to every contact.

pub mod dispatcher;
pub mod email;
pub mod webhook;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::blocklist::anon_id;

#[derive(Debug, Clone)]
pub struct AlertMessage {
    /// Destination identifier (phone number, email address, ...).
    pub contact: String,
    pub subject: String,
    pub body: String,
    pub ts: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, msg: &AlertMessage) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Fallback channel: writes the alert to the log only. Always succeeds.
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, msg: &AlertMessage) -> Result<()> {
        tracing::warn!(
            target: "notify",
            contact = %anon_id(&msg.contact),
            subject = %msg.subject,
            "alert (log channel): {}",
            msg.body.replace('\n', " | ")
        );
        Ok(())
    }
    fn name(&self) -> &'static str {
        "log"
    }
}

/// Pick the delivery channel from env:
/// 1) ALERT_WEBHOOK_URL => JSON webhook (SMS/iMessage bridge, chat hook, ...)
/// 2) SMTP_HOST         => email
/// 3) otherwise         => log only
pub fn notifier_from_env() -> Result<Arc<dyn Notifier>> {
    if let Ok(url) = std::env::var("ALERT_WEBHOOK_URL") {
        if !url.trim().is_empty() {
            return Ok(Arc::new(webhook::WebhookNotifier::new(url.trim().to_string())));
        }
    }
    if let Some(email) = email::EmailNotifier::from_env()? {
        return Ok(Arc::new(email));
    }
    tracing::debug!(target: "notify", "no alert channel configured; using log notifier");
    Ok(Arc::new(LogNotifier))
}

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{AlertMessage, Notifier};

/// Posts each alert as JSON to a webhook that performs the actual delivery.
/// No retries: a failed post is reported once and the next qualifying turn
/// decides whether to alert again.
#[derive(Clone)]
pub struct WebhookNotifier {
    url: String,
    client: Client,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: Client::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    to: &'a str,
    subject: &'a str,
    text: &'a str,
    ts: String,
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, msg: &AlertMessage) -> Result<()> {
        let payload = WebhookPayload {
            to: &msg.contact,
            subject: &msg.subject,
            text: &msg.body,
            ts: msg.ts.to_rfc3339(),
        };

        let rsp = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow!("alert webhook request failed: {e}"))?;

        rsp.error_for_status_ref()
            .map_err(|e| anyhow!("alert webhook HTTP error: {e}"))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

// src/notify/dispatcher.rs
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use super::{AlertMessage, Notifier};
use crate::blocklist::{anon_id, SuspiciousNumberStore};
use crate::oracle::{AlertDispatcher, AlertRequest};

/// Alert dispatcher over a `Notifier` and the shared blocklist.
/// - The report number (if any) is upserted first, independent of delivery.
/// - Delivered = every contact was reached. No contacts => not delivered.
/// - Nothing is retried here.
pub struct ContactAlertDispatcher {
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn SuspiciousNumberStore>,
}

impl ContactAlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, store: Arc<dyn SuspiciousNumberStore>) -> Self {
        Self { notifier, store }
    }
}

pub fn compose_alert_body(alert: &AlertRequest) -> String {
    let reason = if alert.reasoning.trim().is_empty() {
        "-"
    } else {
        alert.reasoning.trim()
    };
    format!(
        "SCAM ALERT: your loved one may be on a scam call.\nRisk level: {}/100\nConfidence: {}/100\nReason: {}\nPlease check on them immediately.",
        alert.risk, alert.confidence, reason
    )
}

#[async_trait::async_trait]
impl AlertDispatcher for ContactAlertDispatcher {
    async fn dispatch(&self, alert: &AlertRequest) -> Result<bool> {
        if let Some(number) = &alert.report_number {
            if let Err(e) = self.store.report(number).await {
                warn!(target: "notify", id = %anon_id(number), "blocklist report failed: {e:#}");
            }
        }

        if alert.contacts.is_empty() {
            warn!(target: "notify", "no emergency contacts configured");
            return Ok(false);
        }

        let body = compose_alert_body(alert);
        let ts = Utc::now();
        let mut delivered = true;
        for contact in &alert.contacts {
            let msg = AlertMessage {
                contact: contact.clone(),
                subject: format!("Scam alert (risk {}/100)", alert.risk),
                body: body.clone(),
                ts,
            };
            match self.notifier.send(&msg).await {
                Ok(()) => info!(target: "notify", channel = self.notifier.name(), contact = %anon_id(contact), "alert delivered"),
                Err(e) => {
                    delivered = false;
                    warn!(target: "notify", channel = self.notifier.name(), contact = %anon_id(contact), "alert delivery failed: {e:#}");
                }
            }
        }
        Ok(delivered)
    }

    fn name(&self) -> &'static str {
        "alert_dispatcher"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocklist::Blocklist;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
        fail_for: Option<String>,
    }

    #[async_trait::async_trait]
    impl Notifier for Recorder {
        async fn send(&self, msg: &AlertMessage) -> Result<()> {
            if self.fail_for.as_deref() == Some(msg.contact.as_str()) {
                anyhow::bail!("carrier rejected");
            }
            self.sent.lock().unwrap().push(msg.contact.clone());
            Ok(())
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    fn req(contacts: &[&str], report: Option<&str>) -> AlertRequest {
        AlertRequest {
            risk: 90,
            confidence: 85,
            reasoning: "asks for gift cards".into(),
            contacts: contacts.iter().map(|s| s.to_string()).collect(),
            report_number: report.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn fans_out_and_reports_number() {
        let rec = Arc::new(Recorder::default());
        let store = Arc::new(Blocklist::in_memory());
        let d = ContactAlertDispatcher::new(rec.clone(), store.clone());

        let ok = d
            .dispatch(&req(&["+15550001", "+15550002"], Some("+1 555 666 7777")))
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(rec.sent.lock().unwrap().len(), 2);
        assert_eq!(store.check("+15556667777").await.unwrap().report_count, 1);
    }

    #[tokio::test]
    async fn partial_failure_is_not_delivered_but_still_reports() {
        let rec = Arc::new(Recorder {
            fail_for: Some("+15550002".into()),
            ..Default::default()
        });
        let store = Arc::new(Blocklist::in_memory());
        let d = ContactAlertDispatcher::new(rec.clone(), store.clone());

        let ok = d
            .dispatch(&req(&["+15550001", "+15550002"], Some("+15556667777")))
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(rec.sent.lock().unwrap().as_slice(), ["+15550001".to_string()]);
        assert!(store.check("+15556667777").await.unwrap().found);
    }

    #[tokio::test]
    async fn no_contacts_means_not_delivered() {
        let store = Arc::new(Blocklist::in_memory());
        let d = ContactAlertDispatcher::new(Arc::new(Recorder::default()), store.clone());
        assert!(!d.dispatch(&req(&[], Some("+15556667777"))).await.unwrap());
        assert!(store.check("+15556667777").await.unwrap().found);
    }

    #[test]
    fn body_mentions_scores_and_reason() {
        let body = compose_alert_body(&req(&["x"], None));
        assert!(body.contains("90/100"));
        assert!(body.contains("85/100"));
        assert!(body.contains("gift cards"));
    }
}

use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{AlertMessage, Notifier};

/// SMTP delivery. Contacts must be email addresses (or SMS-gateway addresses).
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailNotifier {
    /// `Ok(None)` when SMTP_HOST is unset; errors only on a half-configured setup.
    pub fn from_env() -> Result<Option<Self>> {
        let Ok(host) = std::env::var("SMTP_HOST") else {
            return Ok(None);
        };
        let user = std::env::var("SMTP_USER").context("SMTP_USER missing")?;
        let pass = std::env::var("SMTP_PASS").context("SMTP_PASS missing")?;
        let from_addr = std::env::var("ALERT_EMAIL_FROM").context("ALERT_EMAIL_FROM missing")?;

        let creds = Credentials::new(user, pass);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .context("invalid SMTP_HOST")?
            .credentials(creds)
            .build();

        let from = from_addr.parse().context("invalid ALERT_EMAIL_FROM")?;
        Ok(Some(Self { mailer, from }))
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, msg: &AlertMessage) -> Result<()> {
        let to: Mailbox = msg
            .contact
            .parse()
            .context("contact is not an email address")?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(msg.subject.clone())
            .header(header::ContentType::TEXT_PLAIN)
            .body(msg.body.clone())
            .context("build email")?;

        self.mailer.send(email).await.context("send email")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "email"
    }
}

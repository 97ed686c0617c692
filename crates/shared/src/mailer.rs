use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::config::SmtpConfig;
use crate::error::{NewsletterError, Result};

/// Hands a finished newsletter to a delivery service
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// Plain-text mail over an authenticated STARTTLS relay
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let from: Mailbox = config.from.parse().map_err(|e| {
            NewsletterError::Configuration(format!("SMTP_FROM is not a mailbox: {}", e))
        })?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| {
                NewsletterError::Configuration(format!(
                    "Failed to set up SMTP relay {}: {}",
                    config.host, e
                ))
            })?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let recipient: Mailbox = to
            .parse()
            .map_err(|e| NewsletterError::Delivery(format!("bad recipient {}: {}", to, e)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(recipient)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| NewsletterError::Delivery(format!("Failed to build message: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NewsletterError::Delivery(format!("SMTP send to {} failed: {}", to, e)))?;

        info!(to, "Newsletter delivered");
        Ok(())
    }
}

/// Prints newsletters instead of sending them
#[derive(Debug, Default)]
pub struct DryRunMailer;

#[async_trait]
impl MailSender for DryRunMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        println!("To: {}\nSubject: {}\n\n{}\n{}", to, subject, body, "-".repeat(72));
        Ok(())
    }
}

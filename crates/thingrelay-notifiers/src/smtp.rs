//! Email notifier over an SMTP relay.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::debug;

use thingrelay_core::config::SmtpConfig;

use crate::error::{NotifierError, Result};
use crate::model::Notification;
use crate::notifier::Notifier;

pub struct SmtpNotifier {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let from = format!("{} <{}>", config.from_name, config.from_address)
            .parse::<Mailbox>()
            .map_err(|e| NotifierError::InvalidConfiguration(format!("from address: {}", e)))?;

        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| NotifierError::InvalidConfiguration(format!("SMTP relay: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        builder = builder.port(config.port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        Ok(Self {
            from,
            transport: builder.build(),
        })
    }

    fn build(&self, contacts: &[String], notification: &Notification) -> Result<lettre::Message> {
        let mut builder = lettre::Message::builder()
            .from(self.from.clone())
            .subject(notification.subject.clone());
        for contact in contacts {
            builder = builder.to(parse_mailbox(contact)?);
        }
        builder
            .header(ContentType::TEXT_PLAIN)
            .body(notification.content.clone())
            .map_err(|e| NotifierError::SendFailed(format!("Failed to build email: {}", e)))
    }
}

fn parse_mailbox(contact: &str) -> Result<Mailbox> {
    contact
        .parse()
        .map_err(|e| NotifierError::InvalidContact(format!("{}: {}", contact, e)))
}

#[async_trait]
impl Notifier for SmtpNotifier {
    fn kind(&self) -> &str {
        "smtp"
    }

    fn validate_contacts(&self, contacts: &[String]) -> Result<()> {
        validate_emails(contacts)
    }

    async fn notify(&self, contacts: &[String], notification: &Notification) -> Result<()> {
        if contacts.is_empty() {
            return Err(NotifierError::SendFailed("No recipients configured".to_string()));
        }
        let email = self.build(contacts, notification)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| NotifierError::SendFailed(format!("Failed to send email: {}", e)))?;
        debug!(recipients = contacts.len(), "Email sent");
        Ok(())
    }
}

pub fn validate_emails(contacts: &[String]) -> Result<()> {
    for contact in contacts {
        parse_mailbox(contact)?;
    }
    Ok(())
}

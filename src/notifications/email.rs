use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox}, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::{config::EmailConfig, domain::User};

use super::{ChannelKind, DeliveryError, NotificationChannel, OutboundMessage};

pub struct EmailChannel {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl EmailChannel {
    /// Returns `None` when email is disabled or the relay cannot be built.
    pub fn new(config: Option<EmailConfig>) -> Option<Self> {
        let cfg = config.filter(|cfg| cfg.enabled)?;

        let mailer = match AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.smtp_host) {
            Ok(builder) => builder
                .port(cfg.smtp_port)
                .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
                .build(),
            Err(e) => {
                tracing::error!("Invalid SMTP relay {}: {}", cfg.smtp_host, e);
                return None;
            }
        };

        Some(Self {
            mailer,
            from: cfg.from,
        })
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, recipient: &User, message: &OutboundMessage) -> Result<(), DeliveryError> {
        let from: Mailbox = self
            .from
            .parse()
            .map_err(|e| DeliveryError::Transport(format!("invalid sender address: {}", e)))?;
        let to: Mailbox = recipient
            .email
            .parse()
            .map_err(|_| DeliveryError::NoAddress)?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(message.title.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(format!("Hi {},\n\n{}\n", recipient.full_name, message.body))
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        Ok(())
    }
}

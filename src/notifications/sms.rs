use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::{config::SmsConfig, domain::User};

use super::{ChannelKind, DeliveryError, NotificationChannel, OutboundMessage};

const MAX_SMS_CHARS: usize = 160;

/// Sends text messages through an HTTP SMS provider.
pub struct SmsChannel {
    client: reqwest::Client,
    config: SmsConfig,
}

#[derive(Serialize)]
struct SmsRequest<'a> {
    to: &'a str,
    sender: &'a str,
    message: String,
}

impl SmsChannel {
    pub fn new(config: Option<SmsConfig>, timeout_secs: u64) -> Option<Self> {
        let config = config.filter(|cfg| cfg.enabled)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| tracing::error!("Failed to build SMS client: {}", e))
            .ok()?;

        Some(Self { client, config })
    }

    pub fn render(message: &OutboundMessage) -> String {
        format!("{}: {}", message.title, message.body)
            .chars()
            .take(MAX_SMS_CHARS)
            .collect()
    }
}

#[async_trait]
impl NotificationChannel for SmsChannel {
    fn name(&self) -> &str {
        "sms"
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send(&self, recipient: &User, message: &OutboundMessage) -> Result<(), DeliveryError> {
        let phone = recipient.phone.as_deref().ok_or(DeliveryError::NoAddress)?;

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&SmsRequest {
                to: phone,
                sender: &self.config.sender,
                message: Self::render(message),
            })
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DeliveryError::Transport(format!(
                "SMS provider returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::NotificationKind;

    #[test]
    fn test_render_truncates_to_one_segment() {
        let message = OutboundMessage {
            kind: NotificationKind::PlanExpiry,
            title: "Your plan is expiring soon".to_string(),
            body: "x".repeat(400),
        };
        let rendered = SmsChannel::render(&message);
        assert_eq!(rendered.chars().count(), MAX_SMS_CHARS);
        assert!(rendered.starts_with("Your plan is expiring soon: "));
    }
}

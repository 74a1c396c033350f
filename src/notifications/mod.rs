//! User notifications.
//!
//! [`NotificationDispatcher`] is the narrow interface the billing core
//! calls after a state change has committed. [`NotificationService`] is the
//! production implementation: it writes a delivery-log row (suppressing
//! repeats through a dedupe key), then fans the message out to every
//! enabled channel, each under its own timeout. Channel failures are
//! recorded on the row and logged; they are never returned to the caller.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    domain::{format_major, PlanTier, User},
    repository::UserRepository,
};

pub mod email;
pub mod sms;

#[cfg(any(test, feature = "test-utils"))]
pub mod recording;

pub use email::EmailChannel;
pub use sms::SmsChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotificationKind {
    PaymentSuccess,
    PaymentFailure,
    PlanExpiry,
    SubscriptionRenewal,
    DepositApproval,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PaymentSuccess => "PaymentSuccess",
            NotificationKind::PaymentFailure => "PaymentFailure",
            NotificationKind::PlanExpiry => "PlanExpiry",
            NotificationKind::SubscriptionRenewal => "SubscriptionRenewal",
            NotificationKind::DepositApproval => "DepositApproval",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentNotice {
    pub payment_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    /// Set for failures.
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryNotice {
    pub tier: PlanTier,
    pub end_date: DateTime<Utc>,
    pub days_remaining: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalNotice {
    pub tier: PlanTier,
    pub new_end_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositNotice {
    pub deposit_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
}

/// What happened to one notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub notification_id: Option<Uuid>,
    pub email_sent: bool,
    pub sms_sent: bool,
    /// A notification with the same dedupe key was already recorded.
    pub suppressed: bool,
    pub error: Option<String>,
}

impl DeliveryReport {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify_payment_success(&self, user_id: Uuid, notice: PaymentNotice) -> DeliveryReport;
    async fn notify_payment_failure(&self, user_id: Uuid, notice: PaymentNotice) -> DeliveryReport;
    async fn notify_plan_expiry(&self, user_id: Uuid, notice: ExpiryNotice) -> DeliveryReport;
    async fn notify_subscription_renewal(&self, user_id: Uuid, notice: RenewalNotice) -> DeliveryReport;
    async fn notify_deposit_approval(&self, user_id: Uuid, notice: DepositNotice) -> DeliveryReport;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Email,
    Sms,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("recipient has no address for this channel")]
    NoAddress,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("channel did not respond within {0}s")]
    Timeout(u64),
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> ChannelKind;
    async fn send(&self, recipient: &User, message: &OutboundMessage) -> Result<(), DeliveryError>;
}

/// A rendered notification ready for the delivery log.
#[derive(Debug, Clone)]
struct Notification {
    user_id: Uuid,
    message: OutboundMessage,
    dedupe_key: String,
}

pub struct NotificationService {
    pool: SqlitePool,
    users: Arc<dyn UserRepository>,
    channels: Vec<Arc<dyn NotificationChannel>>,
    timeout: Duration,
}

impl NotificationService {
    pub fn new(pool: SqlitePool, users: Arc<dyn UserRepository>, timeout_secs: u64) -> Self {
        Self {
            pool,
            users,
            channels: Vec::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn register(&mut self, channel: Arc<dyn NotificationChannel>) {
        tracing::info!("Registered notification channel: {}", channel.name());
        self.channels.push(channel);
    }

    fn wants(user: &User, kind: ChannelKind) -> bool {
        match kind {
            ChannelKind::Email => user.email_notifications,
            ChannelKind::Sms => user.sms_notifications && user.phone.is_some(),
        }
    }

    async fn deliver(&self, notification: Notification) -> DeliveryReport {
        let user = match self.users.find_by_id(notification.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return DeliveryReport::failed("User not found"),
            Err(e) => {
                tracing::error!("Notification lookup failed for user {}: {}", notification.user_id, e);
                return DeliveryReport::failed(e.to_string());
            }
        };

        let id = Uuid::new_v4();
        let inserted = sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, kind, title, message, dedupe_key, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(dedupe_key) DO NOTHING
            "#,
        )
        .bind(id.to_string())
        .bind(user.id.to_string())
        .bind(notification.message.kind.as_str())
        .bind(&notification.message.title)
        .bind(&notification.message.body)
        .bind(&notification.dedupe_key)
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(result) if result.rows_affected() == 0 => {
                tracing::debug!("Suppressed duplicate notification {}", notification.dedupe_key);
                return DeliveryReport {
                    suppressed: true,
                    ..Default::default()
                };
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Failed to record notification {}: {}", notification.dedupe_key, e);
                return DeliveryReport::failed(e.to_string());
            }
        }

        let mut report = DeliveryReport {
            notification_id: Some(id),
            ..Default::default()
        };
        let mut errors = Vec::new();

        for channel in &self.channels {
            if !Self::wants(&user, channel.kind()) {
                continue;
            }

            let outcome = tokio::time::timeout(self.timeout, channel.send(&user, &notification.message))
                .await
                .unwrap_or(Err(DeliveryError::Timeout(self.timeout.as_secs())));

            match outcome {
                Ok(()) => {
                    tracing::debug!("Channel {} delivered {} to user {}", channel.name(), notification.dedupe_key, user.id);
                    match channel.kind() {
                        ChannelKind::Email => report.email_sent = true,
                        ChannelKind::Sms => report.sms_sent = true,
                    }
                }
                Err(e) => {
                    tracing::warn!("Channel {} failed for user {}: {}", channel.name(), user.id, e);
                    errors.push(format!("{}: {}", channel.name(), e));
                }
            }
        }

        if !errors.is_empty() {
            report.error = Some(errors.join("; "));
        }

        let recorded = sqlx::query(
            r#"
            UPDATE notifications
            SET email_sent = ?, sms_sent = ?, delivery_error = ?, delivered_at = ?
            WHERE id = ?
            "#,
        )
        .bind(report.email_sent)
        .bind(report.sms_sent)
        .bind(&report.error)
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await;

        if let Err(e) = recorded {
            tracing::error!("Failed to record delivery outcome for {}: {}", id, e);
        }

        report
    }
}

fn money(amount_minor: i64, currency: &str) -> String {
    format!("{} {}", currency, format_major(amount_minor))
}

#[async_trait]
impl NotificationDispatcher for NotificationService {
    async fn notify_payment_success(&self, user_id: Uuid, notice: PaymentNotice) -> DeliveryReport {
        self.deliver(Notification {
            user_id,
            dedupe_key: format!("payment-success:{}", notice.payment_id),
            message: OutboundMessage {
                kind: NotificationKind::PaymentSuccess,
                title: "Payment received".to_string(),
                body: format!(
                    "We received your payment of {} for {}.",
                    money(notice.amount_minor, &notice.currency),
                    notice.description
                ),
            },
        })
        .await
    }

    async fn notify_payment_failure(&self, user_id: Uuid, notice: PaymentNotice) -> DeliveryReport {
        let reason = notice.reason.unwrap_or_else(|| "unknown reason".to_string());
        self.deliver(Notification {
            user_id,
            dedupe_key: format!("payment-failure:{}", notice.payment_id),
            message: OutboundMessage {
                kind: NotificationKind::PaymentFailure,
                title: "Payment failed".to_string(),
                body: format!(
                    "Your payment of {} for {} failed: {}.",
                    money(notice.amount_minor, &notice.currency),
                    notice.description,
                    reason
                ),
            },
        })
        .await
    }

    async fn notify_plan_expiry(&self, user_id: Uuid, notice: ExpiryNotice) -> DeliveryReport {
        self.deliver(Notification {
            user_id,
            dedupe_key: format!("plan-expiry:{}:{}", user_id, notice.end_date.timestamp()),
            message: OutboundMessage {
                kind: NotificationKind::PlanExpiry,
                title: "Your plan is expiring soon".to_string(),
                body: format!(
                    "Your {} plan expires in {} day(s) on {}. Renew to keep your listings active.",
                    notice.tier,
                    notice.days_remaining,
                    notice.end_date.format("%Y-%m-%d")
                ),
            },
        })
        .await
    }

    async fn notify_subscription_renewal(&self, user_id: Uuid, notice: RenewalNotice) -> DeliveryReport {
        self.deliver(Notification {
            user_id,
            dedupe_key: format!("subscription-renewal:{}:{}", user_id, notice.new_end_date.timestamp()),
            message: OutboundMessage {
                kind: NotificationKind::SubscriptionRenewal,
                title: "Subscription renewed".to_string(),
                body: format!(
                    "Your {} plan has been renewed until {}.",
                    notice.tier,
                    notice.new_end_date.format("%Y-%m-%d")
                ),
            },
        })
        .await
    }

    async fn notify_deposit_approval(&self, user_id: Uuid, notice: DepositNotice) -> DeliveryReport {
        self.deliver(Notification {
            user_id,
            dedupe_key: format!("deposit-approval:{}", notice.deposit_id),
            message: OutboundMessage {
                kind: NotificationKind::DepositApproval,
                title: "Security deposit approved".to_string(),
                body: format!(
                    "Your security deposit of {} has been approved. Your premium badge is now active.",
                    money(notice.amount_minor, &notice.currency)
                ),
            },
        })
        .await
    }
}

//! In-memory dispatcher for tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    DeliveryReport, DepositNotice, ExpiryNotice, NotificationDispatcher, NotificationKind,
    PaymentNotice, RenewalNotice,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedNotification {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    /// Payment, deposit or subscription end the notice refers to.
    pub subject: String,
}

#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<RecordedNotification>>,
    failing: AtomicBool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later delivery report a transport error.
    pub fn fail_deliveries(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<RecordedNotification> {
        self.sent.lock().await.clone()
    }

    pub async fn count(&self, kind: NotificationKind) -> usize {
        self.sent.lock().await.iter().filter(|n| n.kind == kind).count()
    }

    async fn record(&self, user_id: Uuid, kind: NotificationKind, subject: String) -> DeliveryReport {
        self.sent.lock().await.push(RecordedNotification {
            user_id,
            kind,
            subject,
        });

        if self.failing.load(Ordering::SeqCst) {
            DeliveryReport::failed("email: transport failure: simulated")
        } else {
            DeliveryReport {
                notification_id: Some(Uuid::new_v4()),
                email_sent: true,
                ..Default::default()
            }
        }
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn notify_payment_success(&self, user_id: Uuid, notice: PaymentNotice) -> DeliveryReport {
        self.record(user_id, NotificationKind::PaymentSuccess, notice.payment_id.to_string())
            .await
    }

    async fn notify_payment_failure(&self, user_id: Uuid, notice: PaymentNotice) -> DeliveryReport {
        self.record(user_id, NotificationKind::PaymentFailure, notice.payment_id.to_string())
            .await
    }

    async fn notify_plan_expiry(&self, user_id: Uuid, notice: ExpiryNotice) -> DeliveryReport {
        self.record(user_id, NotificationKind::PlanExpiry, notice.end_date.to_rfc3339())
            .await
    }

    async fn notify_subscription_renewal(&self, user_id: Uuid, notice: RenewalNotice) -> DeliveryReport {
        self.record(
            user_id,
            NotificationKind::SubscriptionRenewal,
            notice.new_end_date.to_rfc3339(),
        )
        .await
    }

    async fn notify_deposit_approval(&self, user_id: Uuid, notice: DepositNotice) -> DeliveryReport {
        self.record(user_id, NotificationKind::DepositApproval, notice.deposit_id.to_string())
            .await
    }
}

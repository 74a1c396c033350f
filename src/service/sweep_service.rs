use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    config::BillingConfig,
    error::Result,
    notifications::{ExpiryNotice, NotificationDispatcher, RenewalNotice},
    repository::{PaymentRepository, SubscriptionRepository},
};

use super::{entitlement_service::EntitlementService, reconciler::WebhookReconciler};

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct ExpirySweepReport {
    /// Completed payments whose fulfilment was re-applied.
    pub redriven: u64,
    pub expired: u64,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct ReminderSweepReport {
    pub candidates: u64,
    pub sent: u64,
    pub suppressed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct RenewalSweepReport {
    pub candidates: u64,
    pub renewed: u64,
    /// Already extended by an overlapping run.
    pub skipped: u64,
}

/// Scheduler-driven batch jobs. Every sweep is safe to run twice.
pub struct SweepService {
    subscriptions: Arc<dyn SubscriptionRepository>,
    payments: Arc<dyn PaymentRepository>,
    entitlements: Arc<EntitlementService>,
    reconciler: Arc<WebhookReconciler>,
    notifier: Arc<dyn NotificationDispatcher>,
    billing: BillingConfig,
}

impl SweepService {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        payments: Arc<dyn PaymentRepository>,
        entitlements: Arc<EntitlementService>,
        reconciler: Arc<WebhookReconciler>,
        notifier: Arc<dyn NotificationDispatcher>,
        billing: BillingConfig,
    ) -> Self {
        Self {
            subscriptions,
            payments,
            entitlements,
            reconciler,
            notifier,
            billing,
        }
    }

    /// Re-drives stalled fulfilment, then deactivates every subscription
    /// whose window has closed.
    pub async fn run_expiry(&self, now: DateTime<Utc>) -> Result<ExpirySweepReport> {
        let redriven = self.redrive_fulfilment(now).await?;
        let expired = self.entitlements.expire_due(now).await?;

        tracing::info!("Expiry sweep: {} expired, {} fulfilments re-driven", expired, redriven);
        Ok(ExpirySweepReport { redriven, expired })
    }

    async fn redrive_fulfilment(&self, now: DateTime<Utc>) -> Result<u64> {
        let stalled = self.payments.list_unfulfilled(now).await?;
        let mut redriven = 0;

        for payment in stalled {
            match self.reconciler.fulfil(&payment).await {
                Ok(()) => redriven += 1,
                Err(e) => tracing::error!("Re-drive of payment {} failed: {}", payment.id, e),
            }
        }

        Ok(redriven)
    }

    pub async fn run_reminders(&self, now: DateTime<Utc>) -> Result<ReminderSweepReport> {
        let until = now + Duration::days(self.billing.reminder_window_days);
        let expiring = self.subscriptions.list_expiring(now, until).await?;
        let mut report = ReminderSweepReport {
            candidates: expiring.len() as u64,
            ..Default::default()
        };

        for subscription in expiring {
            let delivery = self
                .notifier
                .notify_plan_expiry(
                    subscription.user_id,
                    ExpiryNotice {
                        tier: subscription.tier,
                        end_date: subscription.end_date,
                        days_remaining: subscription.days_remaining(now),
                    },
                )
                .await;

            if delivery.suppressed {
                report.suppressed += 1;
            } else if let Some(error) = delivery.error {
                tracing::warn!("Expiry reminder for user {} failed: {}", subscription.user_id, error);
                report.failed += 1;
            } else {
                report.sent += 1;
            }
        }

        tracing::info!(
            "Reminder sweep: {} candidates, {} sent, {} suppressed",
            report.candidates,
            report.sent,
            report.suppressed
        );
        Ok(report)
    }

    /// Extends auto-renewing subscriptions ending within the renewal window
    /// by one billing period from their current end date.
    pub async fn run_renewals(&self, now: DateTime<Utc>) -> Result<RenewalSweepReport> {
        let until = now + Duration::hours(self.billing.renewal_window_hours);
        let renewable = self.subscriptions.list_renewable(now, until).await?;
        let mut report = RenewalSweepReport {
            candidates: renewable.len() as u64,
            ..Default::default()
        };

        for subscription in renewable {
            let new_end = subscription.end_date + subscription.billing_period.duration();
            let extended = self
                .subscriptions
                .extend_if_unchanged(subscription.user_id, subscription.end_date, new_end)
                .await?;

            if !extended {
                report.skipped += 1;
                continue;
            }

            report.renewed += 1;
            tracing::info!("Renewed {} for user {} until {}", subscription.tier, subscription.user_id, new_end);

            let delivery = self
                .notifier
                .notify_subscription_renewal(
                    subscription.user_id,
                    RenewalNotice {
                        tier: subscription.tier,
                        new_end_date: new_end,
                    },
                )
                .await;
            if let Some(error) = delivery.error {
                tracing::warn!("Renewal notice for user {} failed: {}", subscription.user_id, error);
            }
        }

        Ok(report)
    }
}

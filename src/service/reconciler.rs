//! Turns verified gateway callbacks into ledger transitions.
//!
//! There is exactly one path that moves a payment out of `Pending` in
//! response to a provider: [`WebhookReconciler::handle_callback`]. The
//! transition is a compare-and-set in the store, so redelivered or racing
//! callbacks apply at most once; only the winner runs fulfilment and
//! notifications, and both happen after the transition has committed.

use std::sync::Arc;

use serde::Serialize;

use crate::{
    domain::*,
    error::{AppError, GatewayError, Result},
    notifications::{NotificationDispatcher, PaymentNotice},
    payments::{CallbackOutcome, GatewayEvent, GatewayRegistry, Normalized, RawCallback},
    repository::{DepositRepository, PaymentRepository},
};

use super::entitlement_service::EntitlementService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReconcileOutcome {
    /// This callback moved the payment to the given status.
    Applied(PaymentStatus),
    /// The payment already had the status this callback asks for.
    Duplicate,
    /// The payment is terminal with a different outcome; discarded.
    Anomaly,
    /// Verified, but no payment carries this reference.
    UnknownReference,
    /// Verified, but not an event that moves a payment.
    Ignored,
}

pub struct WebhookReconciler {
    payments: Arc<dyn PaymentRepository>,
    deposits: Arc<dyn DepositRepository>,
    entitlements: Arc<EntitlementService>,
    notifier: Arc<dyn NotificationDispatcher>,
    gateways: GatewayRegistry,
}

impl WebhookReconciler {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        deposits: Arc<dyn DepositRepository>,
        entitlements: Arc<EntitlementService>,
        notifier: Arc<dyn NotificationDispatcher>,
        gateways: GatewayRegistry,
    ) -> Self {
        Self {
            payments,
            deposits,
            entitlements,
            notifier,
            gateways,
        }
    }

    pub async fn handle_callback(
        &self,
        gateway_id: GatewayId,
        callback: RawCallback,
    ) -> Result<ReconcileOutcome> {
        let gateway = self
            .gateways
            .get(gateway_id)
            .map_err(|_| AppError::NotFound(format!("Unknown gateway {}", gateway_id)))?;

        if !gateway.verify(&callback) {
            return Err(AppError::Authentication(format!(
                "{} callback failed verification",
                gateway_id
            )));
        }

        let event = match gateway.normalize(&callback) {
            Ok(Normalized::Event(event)) => event,
            Ok(Normalized::Ignored(kind)) => {
                tracing::debug!("Ignoring {} callback: {}", gateway_id, kind);
                return Ok(ReconcileOutcome::Ignored);
            }
            Err(GatewayError::MalformedCallback(detail)) => {
                tracing::warn!("Malformed {} callback: {}", gateway_id, detail);
                return Err(AppError::BadRequest("Malformed callback".to_string()));
            }
            Err(e) => {
                tracing::error!("Failed to normalize {} callback: {}", gateway_id, e);
                return Err(AppError::BadRequest("Malformed callback".to_string()));
            }
        };

        let Some(payment) = self
            .payments
            .find_by_reference(gateway_id, &event.reference)
            .await?
        else {
            tracing::warn!(
                "Verified {} callback for unknown reference {}; acknowledging",
                gateway_id,
                event.reference
            );
            return Ok(ReconcileOutcome::UnknownReference);
        };

        let transition = Self::transition_for(&payment, &event);
        let target = transition.target();

        if payment.status.is_terminal() {
            return Ok(Self::classify_repeat(&payment, target));
        }

        match self.payments.transition(payment.id, transition).await? {
            Some(updated) => {
                self.after_transition(&updated).await;
                Ok(ReconcileOutcome::Applied(updated.status))
            }
            None => {
                // Lost the race to a concurrent callback.
                let current = self
                    .payments
                    .find_by_id(payment.id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("Payment not found".to_string()))?;
                Ok(Self::classify_repeat(&current, target))
            }
        }
    }

    fn transition_for(payment: &Payment, event: &GatewayEvent) -> PaymentTransition {
        match event.outcome {
            CallbackOutcome::Success => match event.provider_amount_minor {
                Some(received) if received != payment.amount_minor => {
                    tracing::warn!(
                        "Payment {} amount mismatch: expected {}, provider reported {}",
                        payment.id,
                        payment.amount_minor,
                        received
                    );
                    PaymentTransition::Fail {
                        reason: format!(
                            "Amount mismatch: expected {}, received {}",
                            payment.amount_minor, received
                        ),
                        provider_transaction_id: event.provider_transaction_id.clone(),
                    }
                }
                _ => PaymentTransition::Complete {
                    provider_transaction_id: event.provider_transaction_id.clone(),
                },
            },
            CallbackOutcome::Failure => PaymentTransition::Fail {
                reason: event
                    .failure_detail
                    .clone()
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or_else(|| "Payment failed".to_string()),
                provider_transaction_id: event.provider_transaction_id.clone(),
            },
        }
    }

    fn classify_repeat(payment: &Payment, requested: PaymentStatus) -> ReconcileOutcome {
        if payment.status == requested {
            tracing::debug!("Duplicate callback for payment {} ({:?})", payment.id, payment.status);
            ReconcileOutcome::Duplicate
        } else {
            tracing::warn!(
                "Reconciliation anomaly: payment {} is {:?} but callback asks for {:?}; discarded",
                payment.id,
                payment.status,
                requested
            );
            ReconcileOutcome::Anomaly
        }
    }

    /// Side effects for the callback that won the transition. Failures are
    /// logged; the transition itself stands.
    async fn after_transition(&self, payment: &Payment) {
        match payment.status {
            PaymentStatus::Completed => {
                if let Err(e) = self.fulfil(payment).await {
                    tracing::error!("Fulfilment of payment {} failed, will retry: {}", payment.id, e);
                }
                let report = self
                    .notifier
                    .notify_payment_success(payment.user_id, Self::notice(payment))
                    .await;
                if let Some(error) = report.error {
                    tracing::warn!("Payment {} success notice not delivered: {}", payment.id, error);
                }
            }
            PaymentStatus::Failed => {
                if let PaymentPurpose::SecurityDeposit { deposit_id } = &payment.purpose {
                    let reason = payment
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| "Payment failed".to_string());
                    match self.deposits.reject(*deposit_id, &reason).await {
                        Ok(Some(_)) => tracing::info!("Deposit {} rejected after payment failure", deposit_id),
                        Ok(None) => tracing::debug!("Deposit {} was no longer pending", deposit_id),
                        Err(e) => tracing::error!("Failed to reject deposit {}: {}", deposit_id, e),
                    }
                }
                let report = self
                    .notifier
                    .notify_payment_failure(payment.user_id, Self::notice(payment))
                    .await;
                if let Some(error) = report.error {
                    tracing::warn!("Payment {} failure notice not delivered: {}", payment.id, error);
                }
            }
            other => tracing::debug!("No side effects for payment {} in {:?}", payment.id, other),
        }
    }

    fn notice(payment: &Payment) -> PaymentNotice {
        PaymentNotice {
            payment_id: payment.id,
            amount_minor: payment.amount_minor,
            currency: payment.currency.clone(),
            description: payment.description.clone(),
            reason: payment.failure_reason.clone(),
        }
    }

    /// Applies what a completed payment paid for. Claimed through the
    /// ledger so it runs once even when the callback path and the re-drive
    /// sweep overlap; the claim is released if fulfilment fails.
    pub async fn fulfil(&self, payment: &Payment) -> Result<()> {
        if !self.payments.claim_fulfilment(payment.id).await? {
            return Ok(());
        }

        let applied = match &payment.purpose {
            PaymentPurpose::PlanPurchase { tier, billing_period } => self
                .entitlements
                .activate_subscription(payment.user_id, *tier, *billing_period)
                .await
                .map(|_| ()),
            PaymentPurpose::SecurityDeposit { deposit_id } => {
                let reference = payment
                    .provider_transaction_id
                    .clone()
                    .or_else(|| payment.provider_reference.clone())
                    .unwrap_or_else(|| payment.id.to_string());
                self.deposits
                    .set_transaction_reference(*deposit_id, &reference)
                    .await
                    .map(|_| ())
            }
            PaymentPurpose::Generic => Ok(()),
        };

        if let Err(e) = applied {
            self.payments.release_fulfilment(payment.id).await?;
            return Err(e);
        }
        Ok(())
    }
}

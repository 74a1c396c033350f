use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    domain::*,
    error::{AppError, Result},
    payments::{ChargeInitiation, ChargeRequest, GatewayRegistry},
    repository::{PaymentRepository, RefundOutcome, UserRepository},
};

use super::{entitlement_service::EntitlementService, require_admin};

/// Input for a new charge. `plan_tier` turns it into a plan purchase.
#[derive(Debug, Clone)]
pub struct NewCharge {
    pub user_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub gateway: GatewayId,
    pub plan_tier: Option<PlanTier>,
    pub billing_period: Option<BillingPeriod>,
    pub return_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChargeReceipt {
    pub payment_id: Uuid,
    pub provider_reference: String,
    pub redirect_target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefundReceipt {
    pub payment: Payment,
    pub deposit_id: Option<Uuid>,
}

/// Charge initiation, payment lookups and admin refunds.
pub struct PaymentService {
    payments: Arc<dyn PaymentRepository>,
    users: Arc<dyn UserRepository>,
    entitlements: Arc<EntitlementService>,
    gateways: GatewayRegistry,
}

impl PaymentService {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        users: Arc<dyn UserRepository>,
        entitlements: Arc<EntitlementService>,
        gateways: GatewayRegistry,
    ) -> Self {
        Self {
            payments,
            users,
            entitlements,
            gateways,
        }
    }

    pub async fn create_charge(&self, charge: NewCharge) -> Result<ChargeReceipt> {
        if charge.amount_minor <= 0 {
            return Err(AppError::Validation("Amount must be positive".to_string()));
        }
        if charge.currency.len() != 3 || !charge.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(AppError::Validation("Currency must be a 3-letter code".to_string()));
        }
        if charge.billing_period.is_some() && charge.plan_tier.is_none() {
            return Err(AppError::Validation(
                "billing_period requires plan_tier".to_string(),
            ));
        }

        let user = self
            .users
            .find_by_id(charge.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let purpose = match charge.plan_tier {
            Some(tier) => {
                let period = charge.billing_period.unwrap_or(BillingPeriod::Monthly);
                let plan = self.entitlements.get_plan(tier).await?;
                if tier == PlanTier::Free || !plan.is_active {
                    return Err(AppError::Validation(format!(
                        "The {} plan cannot be purchased",
                        plan.name
                    )));
                }
                let price = plan.price_for(period);
                if price != charge.amount_minor {
                    return Err(AppError::Validation(format!(
                        "Amount does not match the {} {} price of {}",
                        plan.name,
                        period.as_str().to_lowercase(),
                        price
                    )));
                }
                PaymentPurpose::PlanPurchase {
                    tier,
                    billing_period: period,
                }
            }
            None => PaymentPurpose::Generic,
        };

        let payment = Payment::new_pending(
            user.id,
            charge.amount_minor,
            charge.currency.to_uppercase(),
            charge.gateway,
            charge.description,
            purpose,
        );

        let mut metadata = BTreeMap::new();
        metadata.insert("email".to_string(), user.email.clone());
        metadata.insert("name".to_string(), user.full_name.clone());
        if let Some(phone) = &user.phone {
            metadata.insert("phone".to_string(), phone.clone());
        }

        let (payment, initiation) = self.start_charge(payment, charge.return_url, metadata).await?;

        Ok(ChargeReceipt {
            payment_id: payment.id,
            provider_reference: initiation.reference,
            redirect_target: initiation.redirect_target,
        })
    }

    /// Persists `payment` as pending and asks its gateway to start the
    /// charge. If the gateway fails, the payment is marked failed with the
    /// reason before the error is returned.
    pub async fn start_charge(
        &self,
        payment: Payment,
        return_target: Option<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<(Payment, ChargeInitiation)> {
        let payment = self.payments.create(payment).await?;

        let request = ChargeRequest {
            payment_id: payment.id,
            user_id: payment.user_id,
            amount_minor: payment.amount_minor,
            currency: payment.currency.clone(),
            description: payment.description.clone(),
            return_target,
            metadata,
        };

        let initiated = match self.gateways.get(payment.gateway) {
            Ok(gateway) => gateway.initiate(&request).await,
            Err(e) => Err(e),
        };

        match initiated {
            Ok(initiation) => {
                let payment = self
                    .payments
                    .set_provider_reference(payment.id, &initiation.reference)
                    .await?;
                tracing::info!(
                    "Payment {} initiated on {} with reference {}",
                    payment.id,
                    payment.gateway,
                    initiation.reference
                );
                Ok((payment, initiation))
            }
            Err(gateway_error) => {
                tracing::error!(
                    "Payment {} could not be initiated on {}: {}",
                    payment.id,
                    payment.gateway,
                    gateway_error
                );
                self.payments
                    .transition(
                        payment.id,
                        PaymentTransition::Fail {
                            reason: format!("Initiation failed: {}", gateway_error),
                            provider_transaction_id: None,
                        },
                    )
                    .await?;
                Err(AppError::Gateway(gateway_error))
            }
        }
    }

    pub async fn get_payment(&self, id: Uuid) -> Result<Payment> {
        self.payments
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Payment not found".to_string()))
    }

    pub async fn payment_history(&self, user_id: Uuid) -> Result<Vec<Payment>> {
        self.payments.find_by_user(user_id).await
    }

    /// Completed -> Refunded. A funded deposit is refunded in the same
    /// transaction; premium flags granted by its approval stay as they are.
    pub async fn refund(
        &self,
        admin_id: Uuid,
        payment_id: Uuid,
        amount_minor: Option<i64>,
        reason: &str,
    ) -> Result<RefundReceipt> {
        require_admin(self.users.as_ref(), admin_id).await?;

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::Validation("A refund reason is required".to_string()));
        }

        let payment = self.get_payment(payment_id).await?;
        let amount = amount_minor.unwrap_or(payment.amount_minor);
        if amount <= 0 || amount > payment.amount_minor {
            return Err(AppError::Validation(format!(
                "Refund amount must be between 1 and {}",
                payment.amount_minor
            )));
        }

        match self.payments.refund(payment_id, amount, reason).await? {
            RefundOutcome::Refunded { payment, deposit_id } => {
                tracing::info!(
                    "Payment {} refunded ({} {}) by admin {}",
                    payment.id,
                    amount,
                    payment.currency,
                    admin_id
                );
                Ok(RefundReceipt { payment, deposit_id })
            }
            RefundOutcome::NotRefundable(status) => Err(AppError::Conflict(format!(
                "Only completed payments can be refunded; this payment is {}",
                status.as_str().to_lowercase()
            ))),
        }
    }
}

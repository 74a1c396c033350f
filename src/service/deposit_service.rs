use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::BillingConfig,
    domain::*,
    error::{AppError, Result},
    notifications::{DepositNotice, NotificationDispatcher},
    repository::{DepositRepository, UserRepository},
};

use super::{payment_service::PaymentService, require_admin};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DepositApplication {
    pub deposit_id: Uuid,
    pub payment_id: Uuid,
    pub redirect_target: String,
}

/// Security deposit workflow: apply, admin review, status.
pub struct DepositService {
    deposits: Arc<dyn DepositRepository>,
    users: Arc<dyn UserRepository>,
    payments: Arc<PaymentService>,
    notifier: Arc<dyn NotificationDispatcher>,
    billing: BillingConfig,
}

impl DepositService {
    pub fn new(
        deposits: Arc<dyn DepositRepository>,
        users: Arc<dyn UserRepository>,
        payments: Arc<PaymentService>,
        notifier: Arc<dyn NotificationDispatcher>,
        billing: BillingConfig,
    ) -> Self {
        Self {
            deposits,
            users,
            payments,
            notifier,
            billing,
        }
    }

    pub async fn apply(
        &self,
        user_id: Uuid,
        gateway: GatewayId,
        return_url: Option<String>,
    ) -> Result<DepositApplication> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        if let Some(existing) = self.deposits.find_live_by_user(user_id).await? {
            return Err(AppError::Conflict(format!(
                "You already have a {} security deposit",
                existing.status.as_str().to_lowercase()
            )));
        }

        let deposit = self
            .deposits
            .create(SecurityDeposit::new_pending(
                user_id,
                self.billing.security_deposit_minor,
                self.billing.currency.clone(),
            ))
            .await?;

        match self.fund(&user, &deposit, gateway, return_url).await {
            Ok(application) => {
                tracing::info!(
                    "Security deposit {} opened for user {} via {}",
                    deposit.id,
                    user_id,
                    gateway
                );
                Ok(application)
            }
            Err(e) => {
                // No payable instrument, so the deposit cannot stay pending.
                let reason = format!("Payment could not be initiated: {}", e);
                if let Err(reject_err) = self.deposits.reject(deposit.id, &reason).await {
                    tracing::error!("Failed to reject unfunded deposit {}: {}", deposit.id, reject_err);
                }
                Err(e)
            }
        }
    }

    async fn fund(
        &self,
        user: &User,
        deposit: &SecurityDeposit,
        gateway: GatewayId,
        return_url: Option<String>,
    ) -> Result<DepositApplication> {
        let payment = Payment::new_pending(
            user.id,
            deposit.amount_minor,
            deposit.currency.clone(),
            gateway,
            "Security deposit",
            PaymentPurpose::SecurityDeposit {
                deposit_id: deposit.id,
            },
        );

        let mut metadata = BTreeMap::new();
        metadata.insert("deposit_id".to_string(), deposit.id.to_string());
        metadata.insert("email".to_string(), user.email.clone());
        metadata.insert("name".to_string(), user.full_name.clone());

        let (payment, initiation) = self.payments.start_charge(payment, return_url, metadata).await?;
        self.deposits.attach_payment(deposit.id, payment.id).await?;

        Ok(DepositApplication {
            deposit_id: deposit.id,
            payment_id: payment.id,
            redirect_target: initiation.redirect_target,
        })
    }

    pub async fn review(
        &self,
        admin_id: Uuid,
        deposit_id: Uuid,
        outcome: ReviewOutcome,
        reason: Option<String>,
    ) -> Result<SecurityDeposit> {
        require_admin(self.users.as_ref(), admin_id).await?;

        let deposit = self
            .deposits
            .find_by_id(deposit_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Security deposit not found".to_string()))?;

        if deposit.status != DepositStatus::Pending {
            return Err(already_reviewed(&deposit));
        }

        match outcome {
            ReviewOutcome::Approved => {
                let approved = match self.deposits.approve(deposit_id, admin_id).await? {
                    Some(approved) => approved,
                    None => return Err(self.conflict_for(deposit_id).await),
                };
                tracing::info!("Deposit {} approved by admin {}", deposit_id, admin_id);

                let report = self
                    .notifier
                    .notify_deposit_approval(
                        approved.user_id,
                        DepositNotice {
                            deposit_id,
                            amount_minor: approved.amount_minor,
                            currency: approved.currency.clone(),
                        },
                    )
                    .await;
                if let Some(error) = report.error {
                    tracing::warn!("Deposit {} approval notice not delivered: {}", deposit_id, error);
                }

                Ok(approved)
            }
            ReviewOutcome::Rejected => {
                let reason = reason
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .ok_or_else(|| {
                        AppError::Validation("A reason is required to reject a deposit".to_string())
                    })?;

                match self.deposits.reject(deposit_id, &reason).await? {
                    Some(rejected) => {
                        tracing::info!("Deposit {} rejected by admin {}", deposit_id, admin_id);
                        Ok(rejected)
                    }
                    None => Err(self.conflict_for(deposit_id).await),
                }
            }
        }
    }

    async fn conflict_for(&self, deposit_id: Uuid) -> AppError {
        match self.deposits.find_by_id(deposit_id).await {
            Ok(Some(current)) => already_reviewed(&current),
            Ok(None) => AppError::NotFound("Security deposit not found".to_string()),
            Err(e) => e,
        }
    }

    pub async fn status(&self, user_id: Uuid) -> Result<Option<SecurityDeposit>> {
        self.deposits.find_latest_by_user(user_id).await
    }
}

fn already_reviewed(deposit: &SecurityDeposit) -> AppError {
    AppError::Conflict(format!(
        "Deposit has already been {}",
        deposit.status.as_str().to_lowercase()
    ))
}

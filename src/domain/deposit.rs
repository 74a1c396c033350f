use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SecurityDeposit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub status: DepositStatus,
    pub payment_id: Option<Uuid>,
    pub transaction_reference: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<Uuid>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_amount_minor: Option<i64>,
    pub refund_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SecurityDeposit {
    pub fn new_pending(user_id: Uuid, amount_minor: i64, currency: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            amount_minor,
            currency: currency.into(),
            status: DepositStatus::Pending,
            payment_id: None,
            transaction_reference: None,
            approved_at: None,
            approved_by: None,
            rejected_at: None,
            rejection_reason: None,
            refunded_at: None,
            refund_amount_minor: None,
            refund_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepositStatus {
    Pending,
    Approved,
    Rejected,
    Refunded,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Pending => "Pending",
            DepositStatus::Approved => "Approved",
            DepositStatus::Rejected => "Rejected",
            DepositStatus::Refunded => "Refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(DepositStatus::Pending),
            "Approved" => Some(DepositStatus::Approved),
            "Rejected" => Some(DepositStatus::Rejected),
            "Refunded" => Some(DepositStatus::Refunded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewOutcome {
    Approved,
    Rejected,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{BillingPeriod, PlanTier};

/// A single charge attempt against one gateway.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub gateway: GatewayId,
    /// Assigned by the gateway on initiation; immutable once set.
    pub provider_reference: Option<String>,
    pub provider_transaction_id: Option<String>,
    pub status: PaymentStatus,
    pub description: String,
    pub purpose: PaymentPurpose,
    pub failure_reason: Option<String>,
    pub refund_amount_minor: Option<i64>,
    pub refund_reason: Option<String>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn new_pending(
        user_id: Uuid,
        amount_minor: i64,
        currency: impl Into<String>,
        gateway: GatewayId,
        description: impl Into<String>,
        purpose: PaymentPurpose,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            amount_minor,
            currency: currency.into(),
            gateway,
            provider_reference: None,
            provider_transaction_id: None,
            status: PaymentStatus::Pending,
            description: description.into(),
            purpose,
            failure_reason: None,
            refund_amount_minor: None,
            refund_reason: None,
            fulfilled_at: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Completed => "Completed",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Refunded => "Refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(PaymentStatus::Pending),
            "Completed" => Some(PaymentStatus::Completed),
            "Failed" => Some(PaymentStatus::Failed),
            "Refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Pending moves once to Completed or Failed; only Completed may
    /// later become Refunded.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Completed)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Completed, PaymentStatus::Refunded)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub enum GatewayId {
    #[serde(rename = "JAZZCASH", alias = "jazzcash")]
    JazzCash,
    #[serde(rename = "EASYPAISA", alias = "easypaisa")]
    Easypaisa,
    #[serde(rename = "STRIPE", alias = "stripe")]
    Stripe,
}

impl GatewayId {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayId::JazzCash => "JazzCash",
            GatewayId::Easypaisa => "Easypaisa",
            GatewayId::Stripe => "Stripe",
        }
    }

    /// Accepts the stored form as well as route segments like `jazzcash`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "jazzcash" => Some(GatewayId::JazzCash),
            "easypaisa" => Some(GatewayId::Easypaisa),
            "stripe" => Some(GatewayId::Stripe),
            _ => None,
        }
    }

    pub fn route_segment(&self) -> &'static str {
        match self {
            GatewayId::JazzCash => "jazzcash",
            GatewayId::Easypaisa => "easypaisa",
            GatewayId::Stripe => "stripe",
        }
    }
}

impl std::fmt::Display for GatewayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Formats minor units as a two-decimal major amount, e.g. `299900` -> `2999.00`.
pub fn format_major(amount_minor: i64) -> String {
    let sign = if amount_minor < 0 { "-" } else { "" };
    let abs = amount_minor.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// What a payment is paying for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentPurpose {
    PlanPurchase {
        tier: PlanTier,
        billing_period: BillingPeriod,
    },
    SecurityDeposit {
        deposit_id: Uuid,
    },
    Generic,
}

/// A ledger transition out of `Pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentTransition {
    Complete {
        provider_transaction_id: Option<String>,
    },
    Fail {
        reason: String,
        provider_transaction_id: Option<String>,
    },
}

impl PaymentTransition {
    pub fn target(&self) -> PaymentStatus {
        match self {
            PaymentTransition::Complete { .. } => PaymentStatus::Completed,
            PaymentTransition::Fail { .. } => PaymentStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use PaymentStatus::*;
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Refunded));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Refunded.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Refunded));
    }

    #[test]
    fn test_purpose_serialization() {
        let purpose = PaymentPurpose::PlanPurchase {
            tier: PlanTier::Professional,
            billing_period: BillingPeriod::Yearly,
        };
        let json = serde_json::to_string(&purpose).unwrap();
        assert_eq!(
            json,
            r#"{"kind":"plan_purchase","tier":"PROFESSIONAL","billing_period":"YEARLY"}"#
        );
        assert_eq!(serde_json::from_str::<PaymentPurpose>(&json).unwrap(), purpose);
    }

    #[test]
    fn test_gateway_parse() {
        assert_eq!(GatewayId::parse("jazzcash"), Some(GatewayId::JazzCash));
        assert_eq!(GatewayId::parse("EASYPAISA"), Some(GatewayId::Easypaisa));
        assert_eq!(GatewayId::parse("Stripe"), Some(GatewayId::Stripe));
        assert_eq!(GatewayId::parse("paypal"), None);
    }
}

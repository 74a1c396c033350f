use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use crate::domain::*;
use crate::error::Result;

pub mod user_repository;
pub mod plan_repository;
pub mod subscription_repository;
pub mod payment_repository;
pub mod deposit_repository;
pub mod listing_repository;

pub use user_repository::SqliteUserRepository;
pub use plan_repository::SqlitePlanRepository;
pub use subscription_repository::SqliteSubscriptionRepository;
pub use payment_repository::SqlitePaymentRepository;
pub use deposit_repository::SqliteDepositRepository;
pub use listing_repository::SqliteListingRepository;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: CreateUserRequest) -> Result<User>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn set_notification_preferences(&self, id: Uuid, email: bool, sms: bool) -> Result<User>;
}

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn find(&self, tier: PlanTier) -> Result<Option<PlanTierConfig>>;
    async fn list(&self, include_inactive: bool) -> Result<Vec<PlanTierConfig>>;
    async fn upsert(&self, plan: PlanTierConfig) -> Result<PlanTierConfig>;
    async fn seed_defaults(&self) -> Result<Vec<PlanTierConfig>>;
}

/// Result of a guarded tier change.
#[derive(Debug, Clone)]
pub enum DowngradeOutcome {
    Applied(Subscription),
    OverLimit { active_listings: i64 },
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Subscription>>;
    /// Inserts a subscription for the user unless one already exists, then
    /// returns whichever row is stored.
    async fn insert_if_absent(&self, subscription: Subscription) -> Result<Subscription>;
    /// Upserts the subscription and mirrors the tier onto the user, atomically.
    async fn activate(&self, subscription: Subscription) -> Result<Subscription>;
    /// Switches tier only if the user's active/pending listings fit under
    /// `max_listings`; the count and the write share one transaction.
    async fn apply_downgrade(
        &self,
        user_id: Uuid,
        tier: PlanTier,
        max_listings: Option<i64>,
    ) -> Result<DowngradeOutcome>;
    async fn cancel(&self, user_id: Uuid) -> Result<Subscription>;
    async fn set_auto_renew(&self, user_id: Uuid, auto_renew: bool) -> Result<Subscription>;
    /// Deactivates every active subscription that ended before `now` and
    /// resets the owners' current plan. Returns the number deactivated.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64>;
    async fn list_expiring(&self, now: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<Subscription>>;
    async fn list_renewable(&self, now: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<Subscription>>;
    /// Moves `end_date` from `current_end` to `new_end`; false if it moved already.
    async fn extend_if_unchanged(
        &self,
        user_id: Uuid,
        current_end: DateTime<Utc>,
        new_end: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Outcome of an admin refund.
#[derive(Debug, Clone)]
pub enum RefundOutcome {
    Refunded {
        payment: Payment,
        deposit_id: Option<Uuid>,
    },
    NotRefundable(PaymentStatus),
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn create(&self, payment: Payment) -> Result<Payment>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>>;
    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Payment>>;
    async fn find_by_reference(&self, gateway: GatewayId, reference: &str) -> Result<Option<Payment>>;
    /// Sets the provider reference once; a second call is a conflict.
    async fn set_provider_reference(&self, id: Uuid, reference: &str) -> Result<Payment>;
    /// Applies the transition only if the payment is still pending.
    /// Returns `None` when another writer got there first.
    async fn transition(&self, id: Uuid, transition: PaymentTransition) -> Result<Option<Payment>>;
    /// Claims the right to run fulfilment for a completed payment.
    async fn claim_fulfilment(&self, id: Uuid) -> Result<bool>;
    async fn release_fulfilment(&self, id: Uuid) -> Result<()>;
    async fn list_unfulfilled(&self, processed_before: DateTime<Utc>) -> Result<Vec<Payment>>;
    /// Completed -> Refunded, paired with the funded deposit in one transaction.
    async fn refund(&self, id: Uuid, amount_minor: i64, reason: &str) -> Result<RefundOutcome>;
}

#[async_trait]
pub trait DepositRepository: Send + Sync {
    async fn create(&self, deposit: SecurityDeposit) -> Result<SecurityDeposit>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<SecurityDeposit>>;
    async fn find_live_by_user(&self, user_id: Uuid) -> Result<Option<SecurityDeposit>>;
    async fn find_latest_by_user(&self, user_id: Uuid) -> Result<Option<SecurityDeposit>>;
    async fn attach_payment(&self, id: Uuid, payment_id: Uuid) -> Result<SecurityDeposit>;
    async fn set_transaction_reference(&self, id: Uuid, reference: &str) -> Result<SecurityDeposit>;
    /// Pending -> Approved plus the owner's premium flags, atomically.
    async fn approve(&self, id: Uuid, admin_id: Uuid) -> Result<Option<SecurityDeposit>>;
    /// Pending -> Rejected.
    async fn reject(&self, id: Uuid, reason: &str) -> Result<Option<SecurityDeposit>>;
}

#[async_trait]
pub trait ListingRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Listing>>;
    async fn count_active_or_pending(&self, agent_id: Uuid) -> Result<i64>;
    async fn count_featured(&self, agent_id: Uuid) -> Result<i64>;
    /// Recounts and inserts under the owner's subscription write lock so
    /// concurrent publishers cannot both pass the quota.
    async fn create_within_quota(&self, listing: NewListing, quota: ListingQuota) -> Result<ListingInsert>;
    async fn set_status(&self, id: Uuid, status: ListingStatus) -> Result<Listing>;
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| crate::error::AppError::Database(e.to_string()))
}

pub(crate) fn to_utc(dt: chrono::NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(dt, Utc)
}

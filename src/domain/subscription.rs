use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{BillingPeriod, PlanTier, PlanTierConfig};

/// The plan currently in effect for a user. One row per user.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier: PlanTier,
    pub billing_period: BillingPeriod,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub auto_renew: bool,
    pub listings_used: i64,
    /// Snapshot of the plan cap at activation time; -1 means unlimited.
    pub listings_limit: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_date < now
    }

    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        let secs = (self.end_date - now).num_seconds().max(0);
        (secs + 86_399) / 86_400
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListingCapacity {
    /// -1 when unlimited.
    pub total: i64,
    pub used: i64,
    /// -1 when unlimited.
    pub remaining: i64,
    pub unlimited: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionUsage {
    pub active_listings: i64,
    pub featured_listings: i64,
    pub max_listings: i32,
    pub max_featured_listings: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionDetails {
    pub subscription: Subscription,
    pub plan: PlanTierConfig,
    pub usage: SubscriptionUsage,
}

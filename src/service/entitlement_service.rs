use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
    domain::*,
    error::{AppError, Result},
    repository::{
        DowngradeOutcome, ListingRepository, PlanRepository, SubscriptionRepository,
        UserRepository,
    },
};

/// Window given to a lazily created free subscription.
const FREE_WINDOW_DAYS: i64 = 30;

/// Subscription lifecycle and the listing quotas it grants.
pub struct EntitlementService {
    plans: Arc<dyn PlanRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    listings: Arc<dyn ListingRepository>,
    users: Arc<dyn UserRepository>,
}

impl EntitlementService {
    pub fn new(
        plans: Arc<dyn PlanRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        listings: Arc<dyn ListingRepository>,
        users: Arc<dyn UserRepository>,
    ) -> Self {
        Self {
            plans,
            subscriptions,
            listings,
            users,
        }
    }

    pub async fn list_plans(&self) -> Result<Vec<PlanTierConfig>> {
        self.plans.list(false).await
    }

    /// Catalog entry for `tier`, falling back to the built-in defaults when
    /// the catalog has not been seeded.
    pub async fn get_plan(&self, tier: PlanTier) -> Result<PlanTierConfig> {
        if let Some(plan) = self.plans.find(tier).await? {
            return Ok(plan);
        }
        default_plan_tiers()
            .into_iter()
            .find(|plan| plan.tier == tier)
            .ok_or_else(|| AppError::NotFound(format!("Plan {} not found", tier)))
    }

    pub async fn get_or_create_subscription(&self, user_id: Uuid) -> Result<Subscription> {
        if let Some(existing) = self.subscriptions.find_by_user(user_id).await? {
            return Ok(existing);
        }

        if self.users.find_by_id(user_id).await?.is_none() {
            return Err(AppError::NotFound("User not found".to_string()));
        }

        let free = self.get_plan(PlanTier::Free).await?;
        let now = Utc::now();
        let subscription = Subscription {
            id: Uuid::new_v4(),
            user_id,
            tier: PlanTier::Free,
            billing_period: BillingPeriod::Monthly,
            start_date: now,
            end_date: now + Duration::days(FREE_WINDOW_DAYS),
            is_active: true,
            auto_renew: false,
            listings_used: 0,
            listings_limit: free.max_listings as i64,
            created_at: now,
            updated_at: now,
        };

        let stored = self.subscriptions.insert_if_absent(subscription).await?;
        tracing::debug!("Subscription ready for user {} on tier {}", user_id, stored.tier);
        Ok(stored)
    }

    /// Fails unless the subscription is active and inside its window.
    fn ensure_current(subscription: &Subscription, now: DateTime<Utc>) -> Result<()> {
        if !subscription.is_active {
            return Err(AppError::denied("Your subscription is not active", None));
        }
        if subscription.has_expired(now) {
            return Err(AppError::denied("Your subscription has expired", None));
        }
        Ok(())
    }

    pub async fn can_publish_listing(&self, user_id: Uuid) -> Result<()> {
        let subscription = self.get_or_create_subscription(user_id).await?;
        Self::ensure_current(&subscription, Utc::now())?;

        let plan = self.get_plan(subscription.tier).await?;
        if let Some(limit) = plan.listing_limit() {
            let used = self.listings.count_active_or_pending(user_id).await?;
            if used >= limit {
                return Err(listing_limit_denied(limit));
            }
        }
        Ok(())
    }

    pub async fn can_create_featured_listing(&self, user_id: Uuid) -> Result<()> {
        let subscription = self.get_or_create_subscription(user_id).await?;
        Self::ensure_current(&subscription, Utc::now())?;

        let plan = self.get_plan(subscription.tier).await?;
        match plan.featured_limit() {
            None => Ok(()),
            Some(0) => Err(AppError::denied(
                format!("The {} plan does not include featured listings", plan.name),
                Some(0),
            )),
            Some(limit) => {
                let featured = self.listings.count_featured(user_id).await?;
                if featured >= limit {
                    Err(featured_limit_denied(limit))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Publishes a listing; the quota check and the insert are one atomic unit.
    pub async fn publish_listing(&self, listing: NewListing) -> Result<Listing> {
        let subscription = self.get_or_create_subscription(listing.agent_id).await?;
        Self::ensure_current(&subscription, Utc::now())?;

        let plan = self.get_plan(subscription.tier).await?;
        if listing.is_featured && plan.featured_limit() == Some(0) {
            return Err(AppError::denied(
                format!("The {} plan does not include featured listings", plan.name),
                Some(0),
            ));
        }

        let quota = ListingQuota {
            max_listings: plan.listing_limit(),
            max_featured: plan.featured_limit(),
        };

        match self.listings.create_within_quota(listing, quota).await? {
            ListingInsert::Created(created) => {
                tracing::info!("Listing {} published by {}", created.id, created.agent_id);
                Ok(created)
            }
            ListingInsert::ListingLimitReached { limit } => Err(listing_limit_denied(limit)),
            ListingInsert::FeaturedLimitReached { limit } => Err(featured_limit_denied(limit)),
        }
    }

    pub async fn archive_listing(&self, user_id: Uuid, listing_id: Uuid) -> Result<Listing> {
        let listing = self
            .listings
            .find_by_id(listing_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Listing not found".to_string()))?;

        if listing.agent_id != user_id {
            return Err(AppError::Forbidden);
        }
        if listing.status == ListingStatus::Archived {
            return Ok(listing);
        }

        self.listings.set_status(listing_id, ListingStatus::Archived).await
    }

    pub async fn listing_capacity(&self, user_id: Uuid) -> Result<ListingCapacity> {
        let subscription = self.get_or_create_subscription(user_id).await?;
        let plan = self.get_plan(subscription.tier).await?;
        let used = self.listings.count_active_or_pending(user_id).await?;

        Ok(match plan.listing_limit() {
            None => ListingCapacity {
                total: UNLIMITED as i64,
                used,
                remaining: UNLIMITED as i64,
                unlimited: true,
            },
            Some(total) => ListingCapacity {
                total,
                used,
                remaining: (total - used).max(0),
                unlimited: false,
            },
        })
    }

    pub async fn subscription_details(&self, user_id: Uuid) -> Result<SubscriptionDetails> {
        let subscription = self.get_or_create_subscription(user_id).await?;
        let plan = self.get_plan(subscription.tier).await?;
        let usage = SubscriptionUsage {
            active_listings: self.listings.count_active_or_pending(user_id).await?,
            featured_listings: self.listings.count_featured(user_id).await?,
            max_listings: plan.max_listings,
            max_featured_listings: plan.max_featured_listings,
        };

        Ok(SubscriptionDetails {
            subscription,
            plan,
            usage,
        })
    }

    /// Starts a fresh window of `billing_period` from now on `tier` and
    /// mirrors the tier onto the user. Re-applying is harmless.
    pub async fn activate_subscription(
        &self,
        user_id: Uuid,
        tier: PlanTier,
        billing_period: BillingPeriod,
    ) -> Result<Subscription> {
        let plan = self.get_plan(tier).await?;
        let now = Utc::now();

        let subscription = Subscription {
            id: Uuid::new_v4(),
            user_id,
            tier,
            billing_period,
            start_date: now,
            end_date: now + billing_period.duration(),
            is_active: true,
            auto_renew: false,
            listings_used: 0,
            listings_limit: plan.max_listings as i64,
            created_at: now,
            updated_at: now,
        };

        let activated = self.subscriptions.activate(subscription).await?;
        tracing::info!(
            "Activated {} ({}) for user {} until {}",
            tier,
            billing_period.as_str(),
            user_id,
            activated.end_date
        );
        Ok(activated)
    }

    /// Moves the user to a cheaper tier, refusing if their live listings
    /// would not fit. Upgrades go through a plan purchase instead.
    pub async fn downgrade(&self, user_id: Uuid, tier: PlanTier) -> Result<Subscription> {
        let current = self.get_or_create_subscription(user_id).await?;
        if tier.rank() >= current.tier.rank() {
            return Err(AppError::BadRequest(format!(
                "{} is not a downgrade from {}",
                tier, current.tier
            )));
        }

        let plan = self.get_plan(tier).await?;
        match self
            .subscriptions
            .apply_downgrade(user_id, tier, plan.listing_limit())
            .await?
        {
            DowngradeOutcome::Applied(subscription) => {
                tracing::info!("User {} downgraded from {} to {}", user_id, current.tier, tier);
                Ok(subscription)
            }
            DowngradeOutcome::OverLimit { active_listings } => Err(AppError::Conflict(format!(
                "Cannot downgrade to {} because you have {} active listings, exceeding the limit of {}",
                plan.name, active_listings, plan.max_listings
            ))),
        }
    }

    pub async fn cancel(&self, user_id: Uuid) -> Result<Subscription> {
        let cancelled = self.subscriptions.cancel(user_id).await?;
        tracing::info!("Subscription cancelled for user {}", user_id);
        Ok(cancelled)
    }

    pub async fn set_auto_renew(&self, user_id: Uuid, auto_renew: bool) -> Result<Subscription> {
        self.get_or_create_subscription(user_id).await?;
        self.subscriptions.set_auto_renew(user_id, auto_renew).await
    }

    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64> {
        self.subscriptions.expire_due(now).await
    }
}

fn listing_limit_denied(limit: i64) -> AppError {
    AppError::denied(
        format!(
            "You have reached your listing limit of {}. Upgrade your plan to publish more listings.",
            limit
        ),
        Some(limit),
    )
}

fn featured_limit_denied(limit: i64) -> AppError {
    AppError::denied(
        format!("You have reached your featured listing limit of {}", limit),
        Some(limit),
    )
}

use chrono::Duration;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Sentinel used by the catalog for "no cap".
pub const UNLIMITED: i32 = -1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanTier {
    Free,
    Starter,
    Professional,
    Premium,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "Free",
            PlanTier::Starter => "Starter",
            PlanTier::Professional => "Professional",
            PlanTier::Premium => "Premium",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Some(PlanTier::Free),
            "starter" => Some(PlanTier::Starter),
            "professional" => Some(PlanTier::Professional),
            "premium" => Some(PlanTier::Premium),
            _ => None,
        }
    }

    /// Ordering used to tell upgrades from downgrades.
    pub fn rank(&self) -> u8 {
        match self {
            PlanTier::Free => 0,
            PlanTier::Starter => 1,
            PlanTier::Professional => 2,
            PlanTier::Premium => 3,
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingPeriod {
    Monthly,
    Yearly,
}

impl BillingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "Monthly",
            BillingPeriod::Yearly => "Yearly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "monthly" => Some(BillingPeriod::Monthly),
            "yearly" => Some(BillingPeriod::Yearly),
            _ => None,
        }
    }

    /// Fixed-length window: 30 days or 365 days, never calendar months.
    pub fn duration(&self) -> Duration {
        match self {
            BillingPeriod::Monthly => Duration::days(30),
            BillingPeriod::Yearly => Duration::days(365),
        }
    }
}

/// Catalog entry for a tier. Owned by the platform.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlanTierConfig {
    pub tier: PlanTier,
    pub name: String,
    pub description: String,
    pub monthly_price_minor: i64,
    pub yearly_price_minor: i64,
    /// -1 means unlimited.
    pub max_listings: i32,
    /// -1 means unlimited.
    pub max_featured_listings: i32,
    pub has_analytics: bool,
    pub has_promotion: bool,
    pub has_priority: bool,
    pub features: Vec<String>,
    pub is_active: bool,
}

impl PlanTierConfig {
    pub fn price_for(&self, period: BillingPeriod) -> i64 {
        match period {
            BillingPeriod::Monthly => self.monthly_price_minor,
            BillingPeriod::Yearly => self.yearly_price_minor,
        }
    }

    pub fn listing_limit(&self) -> Option<i64> {
        cap(self.max_listings)
    }

    pub fn featured_limit(&self) -> Option<i64> {
        cap(self.max_featured_listings)
    }
}

fn cap(raw: i32) -> Option<i64> {
    if raw == UNLIMITED {
        None
    } else {
        Some(raw.max(0) as i64)
    }
}

/// Default catalog seeded on first start.
pub fn default_plan_tiers() -> Vec<PlanTierConfig> {
    let plan = |tier, name: &str, description: &str, monthly: i64, max_listings, max_featured, flags: (bool, bool, bool), features: &[&str]| {
        PlanTierConfig {
            tier,
            name: name.to_string(),
            description: description.to_string(),
            monthly_price_minor: monthly,
            yearly_price_minor: monthly * 10,
            max_listings,
            max_featured_listings: max_featured,
            has_analytics: flags.0,
            has_promotion: flags.1,
            has_priority: flags.2,
            features: features.iter().map(|f| f.to_string()).collect(),
            is_active: true,
        }
    };

    vec![
        plan(
            PlanTier::Free,
            "Free",
            "Get started with basic features",
            0,
            1,
            0,
            (false, false, false),
            &["Basic listing", "Email support"],
        ),
        plan(
            PlanTier::Starter,
            "Starter",
            "Perfect for new agents",
            2999,
            10,
            0,
            (true, false, false),
            &["Up to 10 listings", "Basic analytics", "Email & phone support"],
        ),
        plan(
            PlanTier::Professional,
            "Professional",
            "For active agents",
            7999,
            50,
            5,
            (true, true, false),
            &["Up to 50 listings", "Advanced analytics", "Promotion tools", "Priority support"],
        ),
        plan(
            PlanTier::Premium,
            "Premium",
            "Enterprise solution",
            19999,
            UNLIMITED,
            UNLIMITED,
            (true, true, true),
            &["Unlimited listings", "Full promotion suite", "24/7 priority support", "Team management"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_period_durations() {
        assert_eq!(BillingPeriod::Monthly.duration(), Duration::days(30));
        assert_eq!(BillingPeriod::Yearly.duration(), Duration::days(365));
    }

    #[test]
    fn test_unlimited_caps() {
        let premium = default_plan_tiers()
            .into_iter()
            .find(|p| p.tier == PlanTier::Premium)
            .unwrap();
        assert_eq!(premium.listing_limit(), None);
        assert_eq!(premium.featured_limit(), None);

        let free = default_plan_tiers()
            .into_iter()
            .find(|p| p.tier == PlanTier::Free)
            .unwrap();
        assert_eq!(free.listing_limit(), Some(1));
        assert_eq!(free.featured_limit(), Some(0));
    }

    #[test]
    fn test_tier_parse_and_rank() {
        assert_eq!(PlanTier::parse("PROFESSIONAL"), Some(PlanTier::Professional));
        assert_eq!(PlanTier::parse("starter"), Some(PlanTier::Starter));
        assert_eq!(PlanTier::parse("gold"), None);
        assert!(PlanTier::Starter.rank() < PlanTier::Professional.rank());
    }
}

use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

use crate::{
    domain::{default_plan_tiers, PlanTier, PlanTierConfig},
    error::{AppError, Result},
    repository::PlanRepository,
};

#[derive(FromRow)]
struct PlanRow {
    tier: String,
    name: String,
    description: String,
    monthly_price_minor: i64,
    yearly_price_minor: i64,
    max_listings: i32,
    max_featured_listings: i32,
    has_analytics: bool,
    has_promotion: bool,
    has_priority: bool,
    features: String,
    is_active: bool,
}

pub struct SqlitePlanRepository {
    pool: SqlitePool,
}

impl SqlitePlanRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_plan(row: PlanRow) -> Result<PlanTierConfig> {
        Ok(PlanTierConfig {
            tier: PlanTier::parse(&row.tier)
                .ok_or_else(|| AppError::Database(format!("Invalid plan tier: {}", row.tier)))?,
            name: row.name,
            description: row.description,
            monthly_price_minor: row.monthly_price_minor,
            yearly_price_minor: row.yearly_price_minor,
            max_listings: row.max_listings,
            max_featured_listings: row.max_featured_listings,
            has_analytics: row.has_analytics,
            has_promotion: row.has_promotion,
            has_priority: row.has_priority,
            features: serde_json::from_str(&row.features)
                .map_err(|e| AppError::Database(format!("Invalid plan features: {}", e)))?,
            is_active: row.is_active,
        })
    }
}

#[async_trait]
impl PlanRepository for SqlitePlanRepository {
    async fn find(&self, tier: PlanTier) -> Result<Option<PlanTierConfig>> {
        let row = sqlx::query_as::<_, PlanRow>(
            r#"
            SELECT tier, name, description, monthly_price_minor, yearly_price_minor,
                   max_listings, max_featured_listings, has_analytics, has_promotion,
                   has_priority, features, is_active
            FROM plan_tiers
            WHERE tier = ?
            "#,
        )
        .bind(tier.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_plan).transpose()
    }

    async fn list(&self, include_inactive: bool) -> Result<Vec<PlanTierConfig>> {
        let rows = sqlx::query_as::<_, PlanRow>(
            r#"
            SELECT tier, name, description, monthly_price_minor, yearly_price_minor,
                   max_listings, max_featured_listings, has_analytics, has_promotion,
                   has_priority, features, is_active
            FROM plan_tiers
            WHERE is_active = 1 OR ?
            ORDER BY monthly_price_minor ASC
            "#,
        )
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_plan).collect()
    }

    async fn upsert(&self, plan: PlanTierConfig) -> Result<PlanTierConfig> {
        let features = serde_json::to_string(&plan.features)
            .map_err(|e| AppError::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO plan_tiers (
                tier, name, description, monthly_price_minor, yearly_price_minor,
                max_listings, max_featured_listings, has_analytics, has_promotion,
                has_priority, features, is_active, sort_order
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tier) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                monthly_price_minor = excluded.monthly_price_minor,
                yearly_price_minor = excluded.yearly_price_minor,
                max_listings = excluded.max_listings,
                max_featured_listings = excluded.max_featured_listings,
                has_analytics = excluded.has_analytics,
                has_promotion = excluded.has_promotion,
                has_priority = excluded.has_priority,
                features = excluded.features,
                is_active = excluded.is_active
            "#,
        )
        .bind(plan.tier.as_str())
        .bind(&plan.name)
        .bind(&plan.description)
        .bind(plan.monthly_price_minor)
        .bind(plan.yearly_price_minor)
        .bind(plan.max_listings)
        .bind(plan.max_featured_listings)
        .bind(plan.has_analytics)
        .bind(plan.has_promotion)
        .bind(plan.has_priority)
        .bind(&features)
        .bind(plan.is_active)
        .bind(plan.tier.rank() as i32)
        .execute(&self.pool)
        .await?;

        self.find(plan.tier).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve plan tier".to_string())
        })
    }

    async fn seed_defaults(&self) -> Result<Vec<PlanTierConfig>> {
        let mut seeded = Vec::new();
        for plan in default_plan_tiers() {
            // Only fill gaps; tiers edited by operators are left alone.
            if self.find(plan.tier).await?.is_none() {
                seeded.push(self.upsert(plan).await?);
            }
        }
        Ok(seeded)
    }
}

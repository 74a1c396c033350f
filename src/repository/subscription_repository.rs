use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{BillingPeriod, PlanTier, Subscription},
    error::{AppError, Result},
    repository::{parse_uuid, to_utc, DowngradeOutcome, SubscriptionRepository},
};

#[derive(FromRow)]
struct SubscriptionRow {
    id: String,
    user_id: String,
    tier: String,
    billing_period: String,
    start_date: NaiveDateTime,
    end_date: NaiveDateTime,
    is_active: bool,
    auto_renew: bool,
    listings_used: i64,
    listings_limit: i64,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

const SUBSCRIPTION_COLUMNS: &str = r#"
    id, user_id, tier, billing_period, start_date, end_date, is_active,
    auto_renew, listings_used, listings_limit, created_at, updated_at
"#;

pub struct SqliteSubscriptionRepository {
    pool: SqlitePool,
}

impl SqliteSubscriptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_subscription(row: SubscriptionRow) -> Result<Subscription> {
        Ok(Subscription {
            id: parse_uuid(&row.id)?,
            user_id: parse_uuid(&row.user_id)?,
            tier: PlanTier::parse(&row.tier)
                .ok_or_else(|| AppError::Database(format!("Invalid plan tier: {}", row.tier)))?,
            billing_period: BillingPeriod::parse(&row.billing_period).ok_or_else(|| {
                AppError::Database(format!("Invalid billing period: {}", row.billing_period))
            })?,
            start_date: to_utc(row.start_date),
            end_date: to_utc(row.end_date),
            is_active: row.is_active,
            auto_renew: row.auto_renew,
            listings_used: row.listings_used,
            listings_limit: row.listings_limit,
            created_at: to_utc(row.created_at),
            updated_at: to_utc(row.updated_at),
        })
    }

    async fn fetch_existing(&self, user_id: Uuid) -> Result<Subscription> {
        self.find_by_user(user_id).await?.ok_or_else(|| {
            AppError::NotFound("Subscription not found".to_string())
        })
    }

    async fn list_where(
        &self,
        auto_renew: bool,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
            r#"
            SELECT {}
            FROM subscriptions
            WHERE is_active = 1
              AND auto_renew = ?
              AND end_date > ?
              AND end_date <= ?
            ORDER BY end_date ASC
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(auto_renew)
        .bind(now.naive_utc())
        .bind(until.naive_utc())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_subscription).collect()
    }
}

#[async_trait]
impl SubscriptionRepository for SqliteSubscriptionRepository {
    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = ?",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_subscription).transpose()
    }

    async fn insert_if_absent(&self, subscription: Subscription) -> Result<Subscription> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, tier, billing_period, start_date, end_date, is_active,
                auto_renew, listings_used, listings_limit, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO NOTHING
            "#,
        )
        .bind(subscription.id.to_string())
        .bind(subscription.user_id.to_string())
        .bind(subscription.tier.as_str())
        .bind(subscription.billing_period.as_str())
        .bind(subscription.start_date.naive_utc())
        .bind(subscription.end_date.naive_utc())
        .bind(subscription.is_active)
        .bind(subscription.auto_renew)
        .bind(subscription.listings_used)
        .bind(subscription.listings_limit)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.fetch_existing(subscription.user_id).await
    }

    async fn activate(&self, subscription: Subscription) -> Result<Subscription> {
        let now = Utc::now().naive_utc();
        let user_id = subscription.user_id.to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, tier, billing_period, start_date, end_date, is_active,
                auto_renew, listings_used, listings_limit, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, 1, ?, 0, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                tier = excluded.tier,
                billing_period = excluded.billing_period,
                start_date = excluded.start_date,
                end_date = excluded.end_date,
                is_active = 1,
                listings_limit = excluded.listings_limit,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(subscription.id.to_string())
        .bind(&user_id)
        .bind(subscription.tier.as_str())
        .bind(subscription.billing_period.as_str())
        .bind(subscription.start_date.naive_utc())
        .bind(subscription.end_date.naive_utc())
        .bind(subscription.auto_renew)
        .bind(subscription.listings_limit)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let mirrored = sqlx::query(
            r#"
            UPDATE users
            SET current_plan = ?, plan_start_date = ?, plan_end_date = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(subscription.tier.as_str())
        .bind(subscription.start_date.naive_utc())
        .bind(subscription.end_date.naive_utc())
        .bind(now)
        .bind(&user_id)
        .execute(&mut *tx)
        .await?;

        if mirrored.rows_affected() == 0 {
            // Dropping the transaction rolls back the upsert.
            return Err(AppError::NotFound("User not found".to_string()));
        }

        tx.commit().await?;

        self.fetch_existing(subscription.user_id).await
    }

    async fn apply_downgrade(
        &self,
        user_id: Uuid,
        tier: PlanTier,
        max_listings: Option<i64>,
    ) -> Result<DowngradeOutcome> {
        let now = Utc::now().naive_utc();
        let user_id_str = user_id.to_string();
        let mut tx = self.pool.begin().await?;

        // Writing first takes the database write lock, so the count below
        // cannot race a concurrent listing insert.
        let locked = sqlx::query("UPDATE subscriptions SET updated_at = ? WHERE user_id = ?")
            .bind(now)
            .bind(&user_id_str)
            .execute(&mut *tx)
            .await?;
        if locked.rows_affected() == 0 {
            return Err(AppError::NotFound("Subscription not found".to_string()));
        }

        let active_listings: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM listings WHERE agent_id = ? AND status IN ('Active', 'Pending')",
        )
        .bind(&user_id_str)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(limit) = max_listings {
            if active_listings > limit {
                tx.rollback().await?;
                return Ok(DowngradeOutcome::OverLimit { active_listings });
            }
        }

        sqlx::query(
            "UPDATE subscriptions SET tier = ?, listings_limit = ?, updated_at = ? WHERE user_id = ?",
        )
        .bind(tier.as_str())
        .bind(max_listings.unwrap_or(-1))
        .bind(now)
        .bind(&user_id_str)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET current_plan = ?, updated_at = ? WHERE id = ?")
            .bind(tier.as_str())
            .bind(now)
            .bind(&user_id_str)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(DowngradeOutcome::Applied(self.fetch_existing(user_id).await?))
    }

    async fn cancel(&self, user_id: Uuid) -> Result<Subscription> {
        let now = Utc::now().naive_utc();
        let user_id_str = user_id.to_string();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE subscriptions SET is_active = 0, auto_renew = 0, updated_at = ? WHERE user_id = ?",
        )
        .bind(now)
        .bind(&user_id_str)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Subscription not found".to_string()));
        }

        sqlx::query("UPDATE users SET current_plan = 'Free', updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(&user_id_str)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.fetch_existing(user_id).await
    }

    async fn set_auto_renew(&self, user_id: Uuid, auto_renew: bool) -> Result<Subscription> {
        let result = sqlx::query(
            "UPDATE subscriptions SET auto_renew = ?, updated_at = ? WHERE user_id = ?",
        )
        .bind(auto_renew)
        .bind(Utc::now().naive_utc())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Subscription not found".to_string()));
        }

        self.fetch_existing(user_id).await
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now.naive_utc();
        let stamp = Utc::now().naive_utc();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE users
            SET current_plan = 'Free', updated_at = ?
            WHERE id IN (
                SELECT user_id FROM subscriptions WHERE is_active = 1 AND end_date < ?
            )
            "#,
        )
        .bind(stamp)
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        let expired = sqlx::query(
            "UPDATE subscriptions SET is_active = 0, updated_at = ? WHERE is_active = 1 AND end_date < ?",
        )
        .bind(stamp)
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(expired.rows_affected())
    }

    async fn list_expiring(&self, now: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<Subscription>> {
        self.list_where(false, now, until).await
    }

    async fn list_renewable(&self, now: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<Subscription>> {
        self.list_where(true, now, until).await
    }

    async fn extend_if_unchanged(
        &self,
        user_id: Uuid,
        current_end: DateTime<Utc>,
        new_end: DateTime<Utc>,
    ) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let user_id_str = user_id.to_string();
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            r#"
            UPDATE subscriptions
            SET end_date = ?, updated_at = ?
            WHERE user_id = ? AND end_date = ? AND is_active = 1
            "#,
        )
        .bind(new_end.naive_utc())
        .bind(now)
        .bind(&user_id_str)
        .bind(current_end.naive_utc())
        .execute(&mut *tx)
        .await?;

        if moved.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE users SET plan_end_date = ?, updated_at = ? WHERE id = ?")
            .bind(new_end.naive_utc())
            .bind(now)
            .bind(&user_id_str)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

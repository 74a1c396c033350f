use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::{
    domain::{Listing, ListingInsert, ListingQuota, ListingStatus, NewListing},
    error::{AppError, Result},
    repository::{parse_uuid, to_utc, ListingRepository},
};

#[derive(FromRow)]
struct ListingRow {
    id: String,
    agent_id: String,
    title: String,
    status: String,
    is_featured: bool,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqliteListingRepository {
    pool: SqlitePool,
}

impl SqliteListingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_listing(row: ListingRow) -> Result<Listing> {
        Ok(Listing {
            id: parse_uuid(&row.id)?,
            agent_id: parse_uuid(&row.agent_id)?,
            title: row.title,
            status: ListingStatus::parse(&row.status)
                .ok_or_else(|| AppError::Database(format!("Invalid listing status: {}", row.status)))?,
            is_featured: row.is_featured,
            created_at: to_utc(row.created_at),
            updated_at: to_utc(row.updated_at),
        })
    }

    async fn count_live(tx: &mut Transaction<'_, Sqlite>, agent_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM listings WHERE agent_id = ? AND status IN ('Active', 'Pending')",
        )
        .bind(agent_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(count)
    }

    async fn refresh_usage(
        tx: &mut Transaction<'_, Sqlite>,
        agent_id: &str,
        now: NaiveDateTime,
    ) -> Result<()> {
        let used = Self::count_live(tx, agent_id).await?;
        sqlx::query("UPDATE subscriptions SET listings_used = ?, updated_at = ? WHERE user_id = ?")
            .bind(used)
            .bind(now)
            .bind(agent_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ListingRepository for SqliteListingRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Listing>> {
        let row = sqlx::query_as::<_, ListingRow>(
            r#"
            SELECT id, agent_id, title, status, is_featured, created_at, updated_at
            FROM listings
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_listing).transpose()
    }

    async fn count_active_or_pending(&self, agent_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM listings WHERE agent_id = ? AND status IN ('Active', 'Pending')",
        )
        .bind(agent_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_featured(&self, agent_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM listings
            WHERE agent_id = ? AND is_featured = 1 AND status IN ('Active', 'Pending')
            "#,
        )
        .bind(agent_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn create_within_quota(&self, listing: NewListing, quota: ListingQuota) -> Result<ListingInsert> {
        let now = Utc::now().naive_utc();
        let agent_id = listing.agent_id.to_string();
        let mut tx = self.pool.begin().await?;

        // Touching the owner's subscription row first takes the write lock,
        // so a concurrent publisher blocks here until this commits.
        let locked = sqlx::query("UPDATE subscriptions SET updated_at = ? WHERE user_id = ?")
            .bind(now)
            .bind(&agent_id)
            .execute(&mut *tx)
            .await?;
        if locked.rows_affected() == 0 {
            return Err(AppError::NotFound("Subscription not found".to_string()));
        }

        let live = Self::count_live(&mut tx, &agent_id).await?;
        if let Some(limit) = quota.max_listings {
            if live >= limit {
                tx.rollback().await?;
                return Ok(ListingInsert::ListingLimitReached { limit });
            }
        }

        if listing.is_featured {
            if let Some(limit) = quota.max_featured {
                let featured: i64 = sqlx::query_scalar(
                    r#"
                    SELECT COUNT(*) FROM listings
                    WHERE agent_id = ? AND is_featured = 1 AND status IN ('Active', 'Pending')
                    "#,
                )
                .bind(&agent_id)
                .fetch_one(&mut *tx)
                .await?;

                if featured >= limit {
                    tx.rollback().await?;
                    return Ok(ListingInsert::FeaturedLimitReached { limit });
                }
            }
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO listings (id, agent_id, title, status, is_featured, created_at, updated_at)
            VALUES (?, ?, ?, 'Pending', ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&agent_id)
        .bind(&listing.title)
        .bind(listing.is_featured)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        Self::refresh_usage(&mut tx, &agent_id, now).await?;
        tx.commit().await?;

        let created = self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created listing".to_string())
        })?;
        Ok(ListingInsert::Created(created))
    }

    async fn set_status(&self, id: Uuid, status: ListingStatus) -> Result<Listing> {
        let now = Utc::now().naive_utc();
        let mut tx = self.pool.begin().await?;

        let agent_id: Option<String> = sqlx::query_scalar(
            "UPDATE listings SET status = ?, updated_at = ? WHERE id = ? RETURNING agent_id",
        )
        .bind(status.as_str())
        .bind(now)
        .bind(id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(agent_id) = agent_id else {
            return Err(AppError::NotFound("Listing not found".to_string()));
        };

        Self::refresh_usage(&mut tx, &agent_id, now).await?;
        tx.commit().await?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Listing not found".to_string()))
    }
}

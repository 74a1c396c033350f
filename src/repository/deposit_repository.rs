use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{DepositStatus, SecurityDeposit},
    error::{is_unique_violation, AppError, Result},
    repository::{parse_uuid, to_utc, DepositRepository},
};

#[derive(FromRow)]
struct DepositRow {
    id: String,
    user_id: String,
    amount_minor: i64,
    currency: String,
    status: String,
    payment_id: Option<String>,
    transaction_reference: Option<String>,
    approved_at: Option<NaiveDateTime>,
    approved_by: Option<String>,
    rejected_at: Option<NaiveDateTime>,
    rejection_reason: Option<String>,
    refunded_at: Option<NaiveDateTime>,
    refund_amount_minor: Option<i64>,
    refund_reason: Option<String>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

const DEPOSIT_COLUMNS: &str = r#"
    id, user_id, amount_minor, currency, status, payment_id, transaction_reference,
    approved_at, approved_by, rejected_at, rejection_reason, refunded_at,
    refund_amount_minor, refund_reason, created_at, updated_at
"#;

pub struct SqliteDepositRepository {
    pool: SqlitePool,
}

impl SqliteDepositRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_deposit(row: DepositRow) -> Result<SecurityDeposit> {
        Ok(SecurityDeposit {
            id: parse_uuid(&row.id)?,
            user_id: parse_uuid(&row.user_id)?,
            amount_minor: row.amount_minor,
            currency: row.currency,
            status: DepositStatus::parse(&row.status)
                .ok_or_else(|| AppError::Database(format!("Invalid deposit status: {}", row.status)))?,
            payment_id: row.payment_id.as_deref().map(parse_uuid).transpose()?,
            transaction_reference: row.transaction_reference,
            approved_at: row.approved_at.map(to_utc),
            approved_by: row.approved_by.as_deref().map(parse_uuid).transpose()?,
            rejected_at: row.rejected_at.map(to_utc),
            rejection_reason: row.rejection_reason,
            refunded_at: row.refunded_at.map(to_utc),
            refund_amount_minor: row.refund_amount_minor,
            refund_reason: row.refund_reason,
            created_at: to_utc(row.created_at),
            updated_at: to_utc(row.updated_at),
        })
    }

    async fn fetch_existing(&self, id: Uuid) -> Result<SecurityDeposit> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Security deposit not found".to_string()))
    }

    async fn find_one_by_user(&self, user_id: Uuid, live_only: bool) -> Result<Option<SecurityDeposit>> {
        let row = sqlx::query_as::<_, DepositRow>(&format!(
            r#"
            SELECT {}
            FROM security_deposits
            WHERE user_id = ? AND (? = 0 OR status IN ('Pending', 'Approved'))
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            DEPOSIT_COLUMNS
        ))
        .bind(user_id.to_string())
        .bind(live_only)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_deposit).transpose()
    }
}

#[async_trait]
impl DepositRepository for SqliteDepositRepository {
    async fn create(&self, deposit: SecurityDeposit) -> Result<SecurityDeposit> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO security_deposits (
                id, user_id, amount_minor, currency, status, payment_id,
                transaction_reference, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(deposit.id.to_string())
        .bind(deposit.user_id.to_string())
        .bind(deposit.amount_minor)
        .bind(&deposit.currency)
        .bind(deposit.status.as_str())
        .bind(deposit.payment_id.map(|id| id.to_string()))
        .bind(&deposit.transaction_reference)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("User already has a pending or approved security deposit".to_string())
            } else {
                AppError::from(e)
            }
        })?;

        self.fetch_existing(deposit.id).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<SecurityDeposit>> {
        let row = sqlx::query_as::<_, DepositRow>(&format!(
            "SELECT {} FROM security_deposits WHERE id = ?",
            DEPOSIT_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_deposit).transpose()
    }

    async fn find_live_by_user(&self, user_id: Uuid) -> Result<Option<SecurityDeposit>> {
        self.find_one_by_user(user_id, true).await
    }

    async fn find_latest_by_user(&self, user_id: Uuid) -> Result<Option<SecurityDeposit>> {
        self.find_one_by_user(user_id, false).await
    }

    async fn attach_payment(&self, id: Uuid, payment_id: Uuid) -> Result<SecurityDeposit> {
        let result = sqlx::query(
            "UPDATE security_deposits SET payment_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(payment_id.to_string())
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Security deposit not found".to_string()));
        }

        self.fetch_existing(id).await
    }

    async fn set_transaction_reference(&self, id: Uuid, reference: &str) -> Result<SecurityDeposit> {
        sqlx::query(
            r#"
            UPDATE security_deposits
            SET transaction_reference = COALESCE(transaction_reference, ?), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(reference)
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        self.fetch_existing(id).await
    }

    async fn approve(&self, id: Uuid, admin_id: Uuid) -> Result<Option<SecurityDeposit>> {
        let now = Utc::now().naive_utc();
        let mut tx = self.pool.begin().await?;

        let owner: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE security_deposits
            SET status = 'Approved', approved_at = ?, approved_by = ?, updated_at = ?
            WHERE id = ? AND status = 'Pending'
            RETURNING user_id
            "#,
        )
        .bind(now)
        .bind(admin_id.to_string())
        .bind(now)
        .bind(id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(owner) = owner else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE users
            SET is_premium_license = 1, premium_badge = 1, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(&owner)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.find_by_id(id).await
    }

    async fn reject(&self, id: Uuid, reason: &str) -> Result<Option<SecurityDeposit>> {
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            UPDATE security_deposits
            SET status = 'Rejected', rejected_at = ?, rejection_reason = ?, updated_at = ?
            WHERE id = ? AND status = 'Pending'
            "#,
        )
        .bind(now)
        .bind(reason)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.find_by_id(id).await
    }
}

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{GatewayId, Payment, PaymentPurpose, PaymentStatus, PaymentTransition},
    error::{is_unique_violation, AppError, Result},
    repository::{parse_uuid, to_utc, PaymentRepository, RefundOutcome},
};

#[derive(FromRow)]
struct PaymentRow {
    id: String,
    user_id: String,
    amount_minor: i64,
    currency: String,
    gateway: String,
    provider_reference: Option<String>,
    provider_transaction_id: Option<String>,
    status: String,
    description: String,
    purpose: String,
    failure_reason: Option<String>,
    refund_amount_minor: Option<i64>,
    refund_reason: Option<String>,
    fulfilled_at: Option<NaiveDateTime>,
    processed_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

const PAYMENT_COLUMNS: &str = r#"
    id, user_id, amount_minor, currency, gateway, provider_reference,
    provider_transaction_id, status, description, purpose, failure_reason,
    refund_amount_minor, refund_reason, fulfilled_at, processed_at,
    created_at, updated_at
"#;

pub struct SqlitePaymentRepository {
    pool: SqlitePool,
}

impl SqlitePaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_payment(row: PaymentRow) -> Result<Payment> {
        Ok(Payment {
            id: parse_uuid(&row.id)?,
            user_id: parse_uuid(&row.user_id)?,
            amount_minor: row.amount_minor,
            currency: row.currency,
            gateway: GatewayId::parse(&row.gateway)
                .ok_or_else(|| AppError::Database(format!("Invalid gateway: {}", row.gateway)))?,
            provider_reference: row.provider_reference,
            provider_transaction_id: row.provider_transaction_id,
            status: PaymentStatus::parse(&row.status)
                .ok_or_else(|| AppError::Database(format!("Invalid payment status: {}", row.status)))?,
            description: row.description,
            purpose: serde_json::from_str::<PaymentPurpose>(&row.purpose)
                .map_err(|e| AppError::Database(format!("Invalid payment purpose: {}", e)))?,
            failure_reason: row.failure_reason,
            refund_amount_minor: row.refund_amount_minor,
            refund_reason: row.refund_reason,
            fulfilled_at: row.fulfilled_at.map(to_utc),
            processed_at: row.processed_at.map(to_utc),
            created_at: to_utc(row.created_at),
            updated_at: to_utc(row.updated_at),
        })
    }

    async fn fetch_existing(&self, id: Uuid) -> Result<Payment> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Payment not found".to_string()))
    }
}

#[async_trait]
impl PaymentRepository for SqlitePaymentRepository {
    async fn create(&self, payment: Payment) -> Result<Payment> {
        let purpose = serde_json::to_string(&payment.purpose)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, user_id, amount_minor, currency, gateway, provider_reference,
                provider_transaction_id, status, description, purpose,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(payment.id.to_string())
        .bind(payment.user_id.to_string())
        .bind(payment.amount_minor)
        .bind(&payment.currency)
        .bind(payment.gateway.as_str())
        .bind(&payment.provider_reference)
        .bind(&payment.provider_transaction_id)
        .bind(payment.status.as_str())
        .bind(&payment.description)
        .bind(purpose)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_by_id(payment.id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created payment".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE id = ?",
            PAYMENT_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE user_id = ? ORDER BY created_at DESC",
            PAYMENT_COLUMNS
        ))
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_payment).collect()
    }

    async fn find_by_reference(&self, gateway: GatewayId, reference: &str) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE gateway = ? AND provider_reference = ?",
            PAYMENT_COLUMNS
        ))
        .bind(gateway.as_str())
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn set_provider_reference(&self, id: Uuid, reference: &str) -> Result<Payment> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET provider_reference = ?, updated_at = ?
            WHERE id = ? AND provider_reference IS NULL
            "#,
        )
        .bind(reference)
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("Provider reference already in use".to_string())
            } else {
                AppError::from(e)
            }
        })?;

        if result.rows_affected() == 0 {
            let existing = self.fetch_existing(id).await?;
            if existing.provider_reference.as_deref() == Some(reference) {
                return Ok(existing);
            }
            return Err(AppError::Conflict(
                "Payment already has a provider reference".to_string(),
            ));
        }

        self.fetch_existing(id).await
    }

    async fn transition(&self, id: Uuid, transition: PaymentTransition) -> Result<Option<Payment>> {
        let now = Utc::now().naive_utc();
        let target = transition.target();

        let (failure_reason, provider_transaction_id) = match transition {
            PaymentTransition::Complete { provider_transaction_id } => (None, provider_transaction_id),
            PaymentTransition::Fail { reason, provider_transaction_id } => {
                (Some(reason), provider_transaction_id)
            }
        };

        // The status guard makes this a compare-and-set: exactly one
        // concurrent writer sees rows_affected == 1.
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = ?,
                failure_reason = ?,
                provider_transaction_id = COALESCE(?, provider_transaction_id),
                processed_at = ?,
                updated_at = ?
            WHERE id = ? AND status = 'Pending'
            "#,
        )
        .bind(target.as_str())
        .bind(failure_reason)
        .bind(provider_transaction_id)
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.find_by_id(id).await
    }

    async fn claim_fulfilment(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET fulfilled_at = ?, updated_at = ?
            WHERE id = ? AND status = 'Completed' AND fulfilled_at IS NULL
            "#,
        )
        .bind(Utc::now().naive_utc())
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_fulfilment(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE payments SET fulfilled_at = NULL, updated_at = ? WHERE id = ?")
            .bind(Utc::now().naive_utc())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_unfulfilled(&self, processed_before: DateTime<Utc>) -> Result<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            SELECT {}
            FROM payments
            WHERE status = 'Completed'
              AND fulfilled_at IS NULL
              AND processed_at <= ?
            ORDER BY processed_at ASC
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(processed_before.naive_utc())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_payment).collect()
    }

    async fn refund(&self, id: Uuid, amount_minor: i64, reason: &str) -> Result<RefundOutcome> {
        let now = Utc::now().naive_utc();
        let id_str = id.to_string();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'Refunded', refund_amount_minor = ?, refund_reason = ?, updated_at = ?
            WHERE id = ? AND status = 'Completed'
            "#,
        )
        .bind(amount_minor)
        .bind(reason)
        .bind(now)
        .bind(&id_str)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            let existing = self.fetch_existing(id).await?;
            return Ok(RefundOutcome::NotRefundable(existing.status));
        }

        let deposit_id: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE security_deposits
            SET status = 'Refunded', refunded_at = ?, refund_amount_minor = ?,
                refund_reason = ?, updated_at = ?
            WHERE payment_id = ? AND status <> 'Refunded'
            RETURNING id
            "#,
        )
        .bind(now)
        .bind(amount_minor)
        .bind(reason)
        .bind(now)
        .bind(&id_str)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        let payment = self.fetch_existing(id).await?;
        let deposit_id = deposit_id.as_deref().map(parse_uuid).transpose()?;

        Ok(RefundOutcome::Refunded { payment, deposit_id })
    }
}

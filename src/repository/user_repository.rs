use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{CreateUserRequest, PlanTier, User, UserRole},
    error::{AppError, Result},
    repository::{parse_uuid, to_utc, UserRepository},
};

#[derive(FromRow)]
struct UserRow {
    id: String,
    email: String,
    full_name: String,
    phone: Option<String>,
    role: String,
    current_plan: String,
    plan_start_date: Option<NaiveDateTime>,
    plan_end_date: Option<NaiveDateTime>,
    is_premium_license: bool,
    premium_badge: bool,
    email_notifications: bool,
    sms_notifications: bool,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

const USER_COLUMNS: &str = r#"
    id, email, full_name, phone, role, current_plan,
    plan_start_date, plan_end_date, is_premium_license, premium_badge,
    email_notifications, sms_notifications, created_at, updated_at
"#;

pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_user(row: UserRow) -> Result<User> {
        Ok(User {
            id: parse_uuid(&row.id)?,
            email: row.email,
            full_name: row.full_name,
            phone: row.phone,
            role: UserRole::parse(&row.role)
                .ok_or_else(|| AppError::Database(format!("Invalid user role: {}", row.role)))?,
            current_plan: PlanTier::parse(&row.current_plan)
                .ok_or_else(|| AppError::Database(format!("Invalid plan tier: {}", row.current_plan)))?,
            plan_start_date: row.plan_start_date.map(to_utc),
            plan_end_date: row.plan_end_date.map(to_utc),
            is_premium_license: row.is_premium_license,
            premium_badge: row.premium_badge,
            email_notifications: row.email_notifications,
            sms_notifications: row.sms_notifications,
            created_at: to_utc(row.created_at),
            updated_at: to_utc(row.updated_at),
        })
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create(&self, user: CreateUserRequest) -> Result<User> {
        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO users (id, email, full_name, phone, role, current_plan, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'Free', ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.phone)
        .bind(user.role.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if crate::error::is_unique_violation(&e) {
                AppError::Conflict("Email already exists".to_string())
            } else {
                AppError::Database(e.to_string())
            }
        })?;

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created user".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = ?",
            USER_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_user).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE email = ?",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_user).transpose()
    }

    async fn set_notification_preferences(&self, id: Uuid, email: bool, sms: bool) -> Result<User> {
        let result = sqlx::query(
            "UPDATE users SET email_notifications = ?, sms_notifications = ?, updated_at = ? WHERE id = ?",
        )
        .bind(email)
        .bind(sms)
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("User not found".to_string()));
        }

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve updated user".to_string())
        })
    }
}

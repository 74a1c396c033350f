use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::PlanTier;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: UserRole,
    /// Denormalized copy of the subscription tier, kept for display.
    pub current_plan: PlanTier,
    pub plan_start_date: Option<DateTime<Utc>>,
    pub plan_end_date: Option<DateTime<Utc>>,
    pub is_premium_license: bool,
    pub premium_badge: bool,
    pub email_notifications: bool,
    pub sms_notifications: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Agent,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Agent => "Agent",
            UserRole::Admin => "Admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Agent" => Some(UserRole::Agent),
            "Admin" => Some(UserRole::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: UserRole,
}

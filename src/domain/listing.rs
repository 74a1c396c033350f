use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Listing {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub title: String,
    pub status: ListingStatus,
    pub is_featured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingStatus {
    Pending,
    Active,
    Archived,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Pending => "Pending",
            ListingStatus::Active => "Active",
            ListingStatus::Archived => "Archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(ListingStatus::Pending),
            "Active" => Some(ListingStatus::Active),
            "Archived" => Some(ListingStatus::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewListing {
    pub agent_id: Uuid,
    pub title: String,
    pub is_featured: bool,
}

/// Caps applied when inserting a listing. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListingQuota {
    pub max_listings: Option<i64>,
    pub max_featured: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum ListingInsert {
    Created(Listing),
    ListingLimitReached { limit: i64 },
    FeaturedLimitReached { limit: i64 },
}

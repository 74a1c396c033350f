use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{api::state::AppState, domain::User, error::Result};

/// Channels a user accepts notices on. SMS also needs a phone number.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct NotificationPreferences {
    pub email: bool,
    pub sms: bool,
}

impl From<&User> for NotificationPreferences {
    fn from(user: &User) -> Self {
        Self {
            email: user.email_notifications,
            sms: user.sms_notifications,
        }
    }
}

#[utoipa::path(
    put,
    path = "/api/users/{user_id}/notifications",
    tag = "users",
    params(("user_id" = Uuid, Path, description = "User")),
    request_body = NotificationPreferences,
    responses(
        (status = 200, body = NotificationPreferences),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn update_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(preferences): Json<NotificationPreferences>,
) -> Result<Json<NotificationPreferences>> {
    let user = state
        .service_context
        .user_repo
        .set_notification_preferences(user_id, preferences.email, preferences.sms)
        .await?;

    tracing::info!(
        "User {} notification channels: email={} sms={}",
        user.id,
        user.email_notifications,
        user.sms_notifications
    );

    Ok(Json(NotificationPreferences::from(&user)))
}

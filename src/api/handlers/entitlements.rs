use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    api::state::AppState,
    domain::ListingCapacity,
    error::{AppError, Result},
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProbeRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub featured: bool,
}

/// A denial is a normal answer here, not an error status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProbeResponse {
    pub allowed: bool,
    pub reason: Option<String>,
    pub limit: Option<i64>,
}

#[utoipa::path(
    post,
    path = "/api/entitlements/probe",
    tag = "entitlements",
    request_body = ProbeRequest,
    responses((status = 200, body = ProbeResponse))
)]
pub async fn probe(
    State(state): State<AppState>,
    Json(request): Json<ProbeRequest>,
) -> Result<Json<ProbeResponse>> {
    let entitlements = &state.service_context.entitlement_service;
    let verdict = if request.featured {
        entitlements.can_create_featured_listing(request.user_id).await
    } else {
        entitlements.can_publish_listing(request.user_id).await
    };

    match verdict {
        Ok(()) => Ok(Json(ProbeResponse {
            allowed: true,
            reason: None,
            limit: None,
        })),
        Err(AppError::EntitlementDenied { reason, limit }) => Ok(Json(ProbeResponse {
            allowed: false,
            reason: Some(reason),
            limit,
        })),
        Err(e) => Err(e),
    }
}

#[utoipa::path(
    get,
    path = "/api/entitlements/{user_id}/capacity",
    tag = "entitlements",
    params(("user_id" = Uuid, Path, description = "Listing owner")),
    responses((status = 200, body = ListingCapacity))
)]
pub async fn capacity(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ListingCapacity>> {
    let capacity = state
        .service_context
        .entitlement_service
        .listing_capacity(user_id)
        .await?;
    Ok(Json(capacity))
}

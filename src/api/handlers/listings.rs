use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    api::state::AppState,
    domain::{Listing, NewListing},
    error::Result,
};

use super::validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PublishListingRequest {
    pub agent_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    pub is_featured: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ArchiveListingRequest {
    pub agent_id: Uuid,
}

#[utoipa::path(
    post,
    path = "/api/listings",
    tag = "listings",
    request_body = PublishListingRequest,
    responses(
        (status = 201, body = Listing),
        (status = 403, description = "Plan quota reached")
    )
)]
pub async fn publish(
    State(state): State<AppState>,
    Json(request): Json<PublishListingRequest>,
) -> Result<(StatusCode, Json<Listing>)> {
    validate(&request)?;

    let listing = state
        .service_context
        .entitlement_service
        .publish_listing(NewListing {
            agent_id: request.agent_id,
            title: request.title.trim().to_string(),
            is_featured: request.is_featured,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(listing)))
}

#[utoipa::path(
    post,
    path = "/api/listings/{id}/archive",
    tag = "listings",
    params(("id" = Uuid, Path, description = "Listing id")),
    request_body = ArchiveListingRequest,
    responses(
        (status = 200, body = Listing),
        (status = 403, description = "Listing belongs to another agent"),
        (status = 404, description = "Listing not found")
    )
)]
pub async fn archive(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ArchiveListingRequest>,
) -> Result<Json<Listing>> {
    let listing = state
        .service_context
        .entitlement_service
        .archive_listing(request.agent_id, id)
        .await?;
    Ok(Json(listing))
}

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    api::state::AppState,
    domain::{PlanTier, PlanTierConfig, Subscription, SubscriptionDetails},
    error::Result,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct PlanCatalog {
    pub plans: Vec<PlanTierConfig>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DowngradeRequest {
    pub user_id: Uuid,
    pub tier: PlanTier,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AutoRenewRequest {
    pub user_id: Uuid,
    pub auto_renew: bool,
}

#[utoipa::path(
    get,
    path = "/api/plans",
    tag = "subscriptions",
    responses((status = 200, body = PlanCatalog))
)]
pub async fn plans(State(state): State<AppState>) -> Result<Json<PlanCatalog>> {
    let plans = state.service_context.entitlement_service.list_plans().await?;
    Ok(Json(PlanCatalog { plans }))
}

#[utoipa::path(
    get,
    path = "/api/subscriptions/{user_id}",
    tag = "subscriptions",
    params(("user_id" = Uuid, Path, description = "Subscription owner")),
    responses(
        (status = 200, body = SubscriptionDetails),
        (status = 404, description = "User not found")
    )
)]
pub async fn details(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<SubscriptionDetails>> {
    let details = state
        .service_context
        .entitlement_service
        .subscription_details(user_id)
        .await?;
    Ok(Json(details))
}

#[utoipa::path(
    post,
    path = "/api/subscriptions/downgrade",
    tag = "subscriptions",
    request_body = DowngradeRequest,
    responses(
        (status = 200, body = Subscription),
        (status = 400, description = "Target tier is not lower"),
        (status = 409, description = "Active listings exceed the target limit")
    )
)]
pub async fn downgrade(
    State(state): State<AppState>,
    Json(request): Json<DowngradeRequest>,
) -> Result<Json<Subscription>> {
    let subscription = state
        .service_context
        .entitlement_service
        .downgrade(request.user_id, request.tier)
        .await?;
    Ok(Json(subscription))
}

#[utoipa::path(
    post,
    path = "/api/subscriptions/cancel",
    tag = "subscriptions",
    request_body = CancelRequest,
    responses(
        (status = 200, body = Subscription),
        (status = 404, description = "Subscription not found")
    )
)]
pub async fn cancel(
    State(state): State<AppState>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Subscription>> {
    let subscription = state
        .service_context
        .entitlement_service
        .cancel(request.user_id)
        .await?;
    Ok(Json(subscription))
}

#[utoipa::path(
    post,
    path = "/api/subscriptions/auto-renew",
    tag = "subscriptions",
    request_body = AutoRenewRequest,
    responses((status = 200, body = Subscription))
)]
pub async fn set_auto_renew(
    State(state): State<AppState>,
    Json(request): Json<AutoRenewRequest>,
) -> Result<Json<Subscription>> {
    let subscription = state
        .service_context
        .entitlement_service
        .set_auto_renew(request.user_id, request.auto_renew)
        .await?;
    Ok(Json(subscription))
}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    api::state::AppState,
    domain::{GatewayId, SecurityDeposit},
    error::Result,
    service::deposit_service::DepositApplication,
};

use super::validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ApplyDepositRequest {
    pub user_id: Uuid,
    pub gateway: GatewayId,
    #[validate(url)]
    pub return_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DepositStatusResponse {
    /// Most recent deposit, if the user ever applied.
    pub deposit: Option<SecurityDeposit>,
}

#[utoipa::path(
    post,
    path = "/api/deposits",
    tag = "deposits",
    request_body = ApplyDepositRequest,
    responses(
        (status = 201, body = DepositApplication),
        (status = 409, description = "A pending or approved deposit already exists"),
        (status = 502, description = "Gateway could not initiate the charge")
    )
)]
pub async fn apply(
    State(state): State<AppState>,
    Json(request): Json<ApplyDepositRequest>,
) -> Result<(StatusCode, Json<DepositApplication>)> {
    validate(&request)?;

    let application = state
        .service_context
        .deposit_service
        .apply(request.user_id, request.gateway, request.return_url)
        .await?;

    Ok((StatusCode::CREATED, Json(application)))
}

#[utoipa::path(
    get,
    path = "/api/deposits/user/{user_id}",
    tag = "deposits",
    params(("user_id" = Uuid, Path, description = "Applicant")),
    responses((status = 200, body = DepositStatusResponse))
)]
pub async fn status(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<DepositStatusResponse>> {
    let deposit = state.service_context.deposit_service.status(user_id).await?;
    Ok(Json(DepositStatusResponse { deposit }))
}

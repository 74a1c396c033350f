use axum::{extract::State, Json};
use chrono::Utc;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    api::state::AppState,
    domain::{ReviewOutcome, SecurityDeposit},
    error::Result,
    service::{
        payment_service::RefundReceipt,
        sweep_service::{ExpirySweepReport, ReminderSweepReport, RenewalSweepReport},
    },
};

use super::validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ReviewDepositRequest {
    pub admin_id: Uuid,
    pub deposit_id: Uuid,
    pub outcome: ReviewOutcome,
    /// Required when rejecting.
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefundRequest {
    pub admin_id: Uuid,
    pub payment_id: Uuid,
    /// Defaults to the full payment amount.
    #[validate(range(min = 1))]
    pub amount_minor: Option<i64>,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[utoipa::path(
    post,
    path = "/admin/deposits/review",
    tag = "admin",
    request_body = ReviewDepositRequest,
    responses(
        (status = 200, body = SecurityDeposit),
        (status = 403, description = "Caller is not an admin"),
        (status = 409, description = "Deposit already reviewed")
    )
)]
pub async fn review_deposit(
    State(state): State<AppState>,
    Json(request): Json<ReviewDepositRequest>,
) -> Result<Json<SecurityDeposit>> {
    validate(&request)?;

    let deposit = state
        .service_context
        .deposit_service
        .review(request.admin_id, request.deposit_id, request.outcome, request.reason)
        .await?;
    Ok(Json(deposit))
}

#[utoipa::path(
    post,
    path = "/admin/payments/refund",
    tag = "admin",
    request_body = RefundRequest,
    responses(
        (status = 200, body = RefundReceipt),
        (status = 403, description = "Caller is not an admin"),
        (status = 409, description = "Payment is not completed")
    )
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    Json(request): Json<RefundRequest>,
) -> Result<Json<RefundReceipt>> {
    validate(&request)?;

    let receipt = state
        .service_context
        .payment_service
        .refund(request.admin_id, request.payment_id, request.amount_minor, &request.reason)
        .await?;
    Ok(Json(receipt))
}

#[utoipa::path(
    post,
    path = "/admin/sweeps/expiry",
    tag = "sweeps",
    security(("scheduler_token" = [])),
    responses((status = 200, body = ExpirySweepReport))
)]
pub async fn sweep_expiry(State(state): State<AppState>) -> Result<Json<ExpirySweepReport>> {
    let report = state.service_context.sweep_service.run_expiry(Utc::now()).await?;
    Ok(Json(report))
}

#[utoipa::path(
    post,
    path = "/admin/sweeps/reminders",
    tag = "sweeps",
    security(("scheduler_token" = [])),
    responses((status = 200, body = ReminderSweepReport))
)]
pub async fn sweep_reminders(State(state): State<AppState>) -> Result<Json<ReminderSweepReport>> {
    let report = state.service_context.sweep_service.run_reminders(Utc::now()).await?;
    Ok(Json(report))
}

#[utoipa::path(
    post,
    path = "/admin/sweeps/renewals",
    tag = "sweeps",
    security(("scheduler_token" = [])),
    responses((status = 200, body = RenewalSweepReport))
)]
pub async fn sweep_renewals(State(state): State<AppState>) -> Result<Json<RenewalSweepReport>> {
    let report = state.service_context.sweep_service.run_renewals(Utc::now()).await?;
    Ok(Json(report))
}

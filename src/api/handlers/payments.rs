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
    domain::{BillingPeriod, GatewayId, Payment, PlanTier},
    error::Result,
    service::payment_service::{ChargeReceipt, NewCharge},
};

use super::validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreatePaymentRequest {
    pub user_id: Uuid,
    /// Minor units of `currency`.
    #[validate(range(min = 1))]
    pub amount_minor: i64,
    /// Defaults to the billing currency.
    #[validate(length(equal = 3))]
    pub currency: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub description: String,
    pub gateway: GatewayId,
    pub plan_tier: Option<PlanTier>,
    pub billing_period: Option<BillingPeriod>,
    #[validate(url)]
    pub return_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentHistory {
    pub payments: Vec<Payment>,
    pub total: usize,
}

#[utoipa::path(
    post,
    path = "/api/payments",
    tag = "payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 201, description = "Charge initiated", body = ChargeReceipt),
        (status = 422, description = "Invalid charge"),
        (status = 502, description = "Gateway could not initiate the charge")
    )
)]
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<ChargeReceipt>)> {
    validate(&request)?;

    let currency = request
        .currency
        .unwrap_or_else(|| state.settings.billing.currency.clone())
        .to_uppercase();

    let receipt = state
        .service_context
        .payment_service
        .create_charge(NewCharge {
            user_id: request.user_id,
            amount_minor: request.amount_minor,
            currency,
            description: request.description,
            gateway: request.gateway,
            plan_tier: request.plan_tier,
            billing_period: request.billing_period,
            return_url: request.return_url,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(receipt)))
}

#[utoipa::path(
    get,
    path = "/api/payments/{id}",
    tag = "payments",
    params(("id" = Uuid, Path, description = "Payment id")),
    responses(
        (status = 200, body = Payment),
        (status = 404, description = "Payment not found")
    )
)]
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>> {
    let payment = state.service_context.payment_service.get_payment(id).await?;
    Ok(Json(payment))
}

#[utoipa::path(
    get,
    path = "/api/payments/user/{user_id}",
    tag = "payments",
    params(("user_id" = Uuid, Path, description = "Owner of the payments")),
    responses((status = 200, body = PaymentHistory))
)]
pub async fn list_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<PaymentHistory>> {
    let payments = state
        .service_context
        .payment_service
        .payment_history(user_id)
        .await?;
    let total = payments.len();

    Ok(Json(PaymentHistory { payments, total }))
}

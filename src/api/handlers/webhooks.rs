use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    Json,
};
use serde_json::{json, Value};

use crate::{
    api::state::AppState,
    domain::GatewayId,
    error::{AppError, Result},
    payments::RawCallback,
};

const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

/// Single entry point for every provider callback. POST deliveries and
/// GET redirects both land here and go through the same reconciler.
///
/// The provider only ever sees a bare acknowledgment or an opaque error.
#[utoipa::path(
    post,
    path = "/api/payments/webhook/{gateway}",
    tag = "webhooks",
    params(("gateway" = String, Path, description = "jazzcash, easypaisa or stripe")),
    request_body(
        content = String,
        description = "Raw provider payload, form-encoded or JSON",
        content_type = "application/x-www-form-urlencoded"
    ),
    responses(
        (status = 200, description = "Callback acknowledged"),
        (status = 400, description = "Verified but malformed callback"),
        (status = 401, description = "Callback failed verification"),
        (status = 404, description = "Unknown gateway")
    )
)]
pub async fn receive(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    let gateway_id = GatewayId::parse(&gateway)
        .ok_or_else(|| AppError::NotFound(format!("Unknown gateway {}", gateway)))?;

    let header = |name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let callback = RawCallback {
        query,
        content_type: header(CONTENT_TYPE.as_str()),
        body,
        signature_header: header(STRIPE_SIGNATURE_HEADER),
    };

    let outcome = state
        .service_context
        .reconciler
        .handle_callback(gateway_id, callback)
        .await?;

    tracing::debug!("{} callback handled: {:?}", gateway_id, outcome);

    Ok(Json(json!({ "received": true })))
}

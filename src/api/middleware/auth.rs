use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::{
    api::state::AppState,
    error::AppError,
    payments::signing::constant_time_eq,
};

/// Guards the sweep endpoints. The external scheduler presents
/// `Authorization: Bearer <scheduler.token>`; with no token configured the
/// endpoints stay closed.
pub async fn require_scheduler_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let expected = state
        .settings
        .scheduler
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Authentication("Scheduler token is not configured".to_string()))?;

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Authentication("Missing scheduler token".to_string()))?;

    if !constant_time_eq(presented.trim().as_bytes(), expected.as_bytes()) {
        return Err(AppError::Authentication("Invalid scheduler token".to_string()));
    }

    Ok(next.run(request).await)
}

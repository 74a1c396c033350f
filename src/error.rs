use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not allowed: {reason}")]
    EntitlementDenied { reason: String, limit: Option<i64> },

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Failures reported by a payment gateway adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("gateway {0} is not configured")]
    NotConfigured(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("gateway did not respond within {0}s")]
    Timeout(u64),

    #[error("gateway rejected the request: {0}")]
    Rejected(String),

    #[error("malformed callback: {0}")]
    MalformedCallback(String),
}

impl AppError {
    pub fn denied(reason: impl Into<String>, limit: Option<i64>) -> Self {
        AppError::EntitlementDenied {
            reason: reason.into(),
            limit,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Database(ref msg) => {
                tracing::error!("Database error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error occurred".to_string())
            }
            AppError::NotFound(ref msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
            AppError::BadRequest(ref msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Validation(ref msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Authentication(ref msg) => {
                tracing::warn!("Authentication failure: {}", msg);
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            AppError::Conflict(ref msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::EntitlementDenied { ref reason, .. } => (StatusCode::FORBIDDEN, reason.clone()),
            AppError::Gateway(ref err) => {
                tracing::error!("Gateway error: {}", err);
                (StatusCode::BAD_GATEWAY, "Payment could not be initiated".to_string())
            }
            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

/// True when the error is a UNIQUE constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn render(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_gateway_failure_is_opaque_bad_gateway() {
        let (status, body) = render(AppError::Gateway(GatewayError::Transport(
            "connection reset by 10.0.0.7".to_string(),
        )))
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body, json!({ "error": "Payment could not be initiated" }));

        let (status, _) = render(AppError::Gateway(GatewayError::NotConfigured("Stripe".to_string()))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_entitlement_denied_keeps_reason() {
        let (status, body) = render(AppError::denied("Listing limit reached (10)", Some(10))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Listing limit reached (10)");
    }
}

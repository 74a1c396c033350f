use std::collections::BTreeMap;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::json;

const SERVICE_NAME: &str = "AgentPay API";
const DESCRIPTION: &str = "Payments, plan entitlements and security deposits for listing agents";

#[derive(Debug, Serialize)]
pub struct ApiInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub gateways: Vec<&'static str>,
    /// Route group name to its path prefix.
    pub routes: BTreeMap<&'static str, &'static str>,
}

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "name": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
        "endpoints": {
            "health": "/health",
            "api": "/api",
            "docs": "/api/docs",
        }
    }))
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn api_info() -> Json<ApiInfo> {
    let routes = BTreeMap::from([
        ("payments", "/api/payments"),
        ("webhooks", "/api/payments/webhook/{gateway}"),
        ("plans", "/api/plans"),
        ("subscriptions", "/api/subscriptions"),
        ("entitlements", "/api/entitlements"),
        ("listings", "/api/listings"),
        ("deposits", "/api/deposits"),
        ("users", "/api/users/{user_id}/notifications"),
        ("admin", "/admin"),
        ("sweeps", "/admin/sweeps"),
    ]);

    Json(ApiInfo {
        name: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        description: DESCRIPTION.to_string(),
        gateways: vec!["jazzcash", "easypaisa", "stripe"],
        routes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_api_info_lists_route_groups() {
        let Json(info) = api_info().await;
        assert_eq!(info.routes["deposits"], "/api/deposits");
        assert_eq!(info.routes["admin"], "/admin");
        assert_eq!(info.gateways, vec!["jazzcash", "easypaisa", "stripe"]);
    }
}

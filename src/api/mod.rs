pub mod docs;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::TraceLayer,
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    config::Settings,
    service::ServiceContext,
};
use state::AppState;

pub fn create_app(
    service_context: Arc<ServiceContext>,
    settings: Arc<Settings>,
) -> Router {
    let app_state = AppState::new(service_context, settings);

    Router::new()
        // Root and health endpoints
        .route("/", get(handlers::root::root))
        .route("/health", get(handlers::root::health_check))
        .route("/api", get(handlers::root::api_info))

        // API routes
        .nest("/api", api_routes())

        // Admin and scheduler routes
        .nest("/admin", admin_routes(app_state.clone()))

        .merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", docs::ApiDoc::openapi()))

        // Add state to the router
        .with_state(app_state)

        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/payments", payment_routes())
        .route("/plans", get(handlers::subscriptions::plans))
        .nest("/subscriptions", subscription_routes())
        .nest("/entitlements", entitlement_routes())
        .nest("/listings", listing_routes())
        .nest("/deposits", deposit_routes())
        .route("/users/:user_id/notifications", put(handlers::users::update_notifications))
}

fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::payments::create))
        .route("/:id", get(handlers::payments::get))
        .route("/user/:user_id", get(handlers::payments::list_by_user))
        // Providers call back with POST or redirect with GET; both reconcile the same way
        .route(
            "/webhook/:gateway",
            get(handlers::webhooks::receive).post(handlers::webhooks::receive),
        )
}

fn subscription_routes() -> Router<AppState> {
    Router::new()
        .route("/downgrade", post(handlers::subscriptions::downgrade))
        .route("/cancel", post(handlers::subscriptions::cancel))
        .route("/auto-renew", post(handlers::subscriptions::set_auto_renew))
        .route("/:user_id", get(handlers::subscriptions::details))
}

fn entitlement_routes() -> Router<AppState> {
    Router::new()
        .route("/probe", post(handlers::entitlements::probe))
        .route("/:user_id/capacity", get(handlers::entitlements::capacity))
}

fn listing_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::listings::publish))
        .route("/:id/archive", post(handlers::listings::archive))
}

fn deposit_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::deposits::apply))
        .route("/user/:user_id", get(handlers::deposits::status))
}

fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/deposits/review", post(handlers::admin::review_deposit))
        .route("/payments/refund", post(handlers::admin::refund_payment))
        .nest("/sweeps", sweep_routes(state))
}

fn sweep_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/expiry", post(handlers::admin::sweep_expiry))
        .route("/reminders", post(handlers::admin::sweep_reminders))
        .route("/renewals", post(handlers::admin::sweep_renewals))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_scheduler_token,
        ))
}

use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::handlers::payments::create,
        crate::api::handlers::payments::get,
        crate::api::handlers::payments::list_by_user,
        crate::api::handlers::webhooks::receive,
        crate::api::handlers::subscriptions::plans,
        crate::api::handlers::subscriptions::details,
        crate::api::handlers::subscriptions::downgrade,
        crate::api::handlers::subscriptions::cancel,
        crate::api::handlers::subscriptions::set_auto_renew,
        crate::api::handlers::entitlements::probe,
        crate::api::handlers::entitlements::capacity,
        crate::api::handlers::listings::publish,
        crate::api::handlers::listings::archive,
        crate::api::handlers::deposits::apply,
        crate::api::handlers::deposits::status,
        crate::api::handlers::users::update_notifications,
        crate::api::handlers::admin::review_deposit,
        crate::api::handlers::admin::refund_payment,
        crate::api::handlers::admin::sweep_expiry,
        crate::api::handlers::admin::sweep_reminders,
        crate::api::handlers::admin::sweep_renewals
    ),
    components(
        schemas(
            crate::domain::Payment,
            crate::domain::PaymentStatus,
            crate::domain::PaymentPurpose,
            crate::domain::GatewayId,
            crate::domain::PlanTier,
            crate::domain::BillingPeriod,
            crate::domain::PlanTierConfig,
            crate::domain::Subscription,
            crate::domain::SubscriptionDetails,
            crate::domain::ListingCapacity,
            crate::domain::Listing,
            crate::domain::SecurityDeposit,
            crate::domain::ReviewOutcome,
            crate::service::payment_service::ChargeReceipt,
            crate::service::payment_service::RefundReceipt,
            crate::service::deposit_service::DepositApplication,
            crate::api::handlers::users::NotificationPreferences
        )
    ),
    modifiers(&SchedulerTokenAddon),
    tags(
        (name = "payments", description = "Charges and payment history"),
        (name = "webhooks", description = "Gateway callbacks"),
        (name = "subscriptions", description = "Plans and subscriptions"),
        (name = "entitlements", description = "Listing quota checks"),
        (name = "listings", description = "Quota-guarded listing publication"),
        (name = "deposits", description = "Security deposit applications"),
        (name = "users", description = "Notification preferences"),
        (name = "admin", description = "Deposit review and refunds"),
        (name = "sweeps", description = "Scheduler-driven batch jobs")
    )
)]
pub struct ApiDoc;

struct SchedulerTokenAddon;

impl Modify for SchedulerTokenAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "scheduler_token",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_documents_raw_body() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let body = &doc["paths"]["/api/payments/webhook/{gateway}"]["post"]["requestBody"];
        assert!(body["content"]["application/x-www-form-urlencoded"].is_object());
        assert!(doc["components"]["securitySchemes"]["scheduler_token"].is_object());
    }
}

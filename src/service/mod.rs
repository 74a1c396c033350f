pub mod deposit_service;
pub mod entitlement_service;
pub mod payment_service;
pub mod reconciler;
pub mod sweep_service;

use std::sync::Arc;

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    config::Settings,
    domain::User,
    error::{AppError, Result},
    notifications::NotificationDispatcher,
    payments::GatewayRegistry,
    repository::*,
};

pub use deposit_service::DepositService;
pub use entitlement_service::EntitlementService;
pub use payment_service::PaymentService;
pub use reconciler::{ReconcileOutcome, WebhookReconciler};
pub use sweep_service::SweepService;

/// Everything a request handler or the scheduler needs, wired once.
pub struct ServiceContext {
    pub user_repo: Arc<dyn UserRepository>,
    pub plan_repo: Arc<dyn PlanRepository>,
    pub subscription_repo: Arc<dyn SubscriptionRepository>,
    pub payment_repo: Arc<dyn PaymentRepository>,
    pub deposit_repo: Arc<dyn DepositRepository>,
    pub listing_repo: Arc<dyn ListingRepository>,
    pub entitlement_service: Arc<EntitlementService>,
    pub payment_service: Arc<PaymentService>,
    pub reconciler: Arc<WebhookReconciler>,
    pub deposit_service: Arc<DepositService>,
    pub sweep_service: Arc<SweepService>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub db_pool: SqlitePool,
}

impl ServiceContext {
    pub fn new(
        db_pool: SqlitePool,
        settings: &Settings,
        gateways: GatewayRegistry,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let user_repo: Arc<dyn UserRepository> = Arc::new(SqliteUserRepository::new(db_pool.clone()));
        let plan_repo: Arc<dyn PlanRepository> = Arc::new(SqlitePlanRepository::new(db_pool.clone()));
        let subscription_repo: Arc<dyn SubscriptionRepository> =
            Arc::new(SqliteSubscriptionRepository::new(db_pool.clone()));
        let payment_repo: Arc<dyn PaymentRepository> =
            Arc::new(SqlitePaymentRepository::new(db_pool.clone()));
        let deposit_repo: Arc<dyn DepositRepository> =
            Arc::new(SqliteDepositRepository::new(db_pool.clone()));
        let listing_repo: Arc<dyn ListingRepository> =
            Arc::new(SqliteListingRepository::new(db_pool.clone()));

        let entitlement_service = Arc::new(EntitlementService::new(
            plan_repo.clone(),
            subscription_repo.clone(),
            listing_repo.clone(),
            user_repo.clone(),
        ));

        let payment_service = Arc::new(PaymentService::new(
            payment_repo.clone(),
            user_repo.clone(),
            entitlement_service.clone(),
            gateways.clone(),
        ));

        let reconciler = Arc::new(WebhookReconciler::new(
            payment_repo.clone(),
            deposit_repo.clone(),
            entitlement_service.clone(),
            notifier.clone(),
            gateways,
        ));

        let deposit_service = Arc::new(DepositService::new(
            deposit_repo.clone(),
            user_repo.clone(),
            payment_service.clone(),
            notifier.clone(),
            settings.billing.clone(),
        ));

        let sweep_service = Arc::new(SweepService::new(
            subscription_repo.clone(),
            payment_repo.clone(),
            entitlement_service.clone(),
            reconciler.clone(),
            notifier.clone(),
            settings.billing.clone(),
        ));

        Self {
            user_repo,
            plan_repo,
            subscription_repo,
            payment_repo,
            deposit_repo,
            listing_repo,
            entitlement_service,
            payment_service,
            reconciler,
            deposit_service,
            sweep_service,
            notifier,
            db_pool,
        }
    }
}

/// Loads `admin_id` and fails unless that user holds the admin role.
pub(crate) async fn require_admin(users: &dyn UserRepository, admin_id: Uuid) -> Result<User> {
    match users.find_by_id(admin_id).await? {
        Some(user) if user.is_admin() => Ok(user),
        Some(_) => Err(AppError::Forbidden),
        None => Err(AppError::Authentication(format!("Unknown admin {}", admin_id))),
    }
}

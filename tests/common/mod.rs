#![allow(dead_code)]

use std::{path::PathBuf, sync::Arc};

use agentpay::{
    config::Settings,
    domain::{BillingPeriod, CreateUserRequest, GatewayId, PlanTier, User, UserRole},
    notifications::{recording::RecordingDispatcher, NotificationDispatcher},
    payments::{fake::FakeGateway, GatewayRegistry},
    repository::{PlanRepository, UserRepository},
    service::{payment_service::{ChargeReceipt, NewCharge}, ServiceContext},
};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use uuid::Uuid;

pub const SCHEDULER_TOKEN: &str = "test-scheduler-token";
pub const GATEWAY_SECRET: &str = "fake-gateway-secret";

pub struct TestContext {
    pub pool: SqlitePool,
    pub ctx: Arc<ServiceContext>,
    pub settings: Settings,
    pub notifier: Arc<RecordingDispatcher>,
    pub jazzcash: Arc<FakeGateway>,
    pub easypaisa: Arc<FakeGateway>,
    pub stripe: Arc<FakeGateway>,
    db_path: PathBuf,
}

impl Drop for TestContext {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_path);
    }
}

/// Fresh database file per test so concurrent writers contend on a real
/// SQLite lock, with fake gateways under every gateway id.
pub async fn setup() -> anyhow::Result<TestContext> {
    let notifier = Arc::new(RecordingDispatcher::new());
    setup_with_notifier(notifier.clone(), notifier).await
}

pub async fn setup_with_notifier(
    recording: Arc<RecordingDispatcher>,
    notifier: Arc<dyn NotificationDispatcher>,
) -> anyhow::Result<TestContext> {
    let db_path = std::env::temp_dir().join(format!("agentpay-test-{}.db", Uuid::new_v4()));
    let pool = connect(&db_path).await?;

    let mut settings = Settings::default();
    settings.scheduler.token = Some(SCHEDULER_TOKEN.to_string());

    let jazzcash = Arc::new(FakeGateway::new(GatewayId::JazzCash, GATEWAY_SECRET));
    let easypaisa = Arc::new(FakeGateway::new(GatewayId::Easypaisa, GATEWAY_SECRET));
    let stripe = Arc::new(FakeGateway::new(GatewayId::Stripe, GATEWAY_SECRET));
    let gateways = GatewayRegistry::new()
        .with(jazzcash.clone())
        .with(easypaisa.clone())
        .with(stripe.clone());

    let ctx = Arc::new(ServiceContext::new(pool.clone(), &settings, gateways, notifier));
    ctx.plan_repo.seed_defaults().await?;

    Ok(TestContext {
        pool,
        ctx,
        settings,
        notifier: recording,
        jazzcash,
        easypaisa,
        stripe,
        db_path,
    })
}

pub async fn connect(path: &PathBuf) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

impl TestContext {
    pub async fn create_user(&self, role: UserRole) -> anyhow::Result<User> {
        let id = Uuid::new_v4().simple().to_string();
        let user = self
            .ctx
            .user_repo
            .create(CreateUserRequest {
                email: format!("{}@agentpay.test", &id[..12]),
                full_name: "Test Agent".to_string(),
                phone: Some("+923001234567".to_string()),
                role,
            })
            .await?;
        Ok(user)
    }

    pub async fn create_agent(&self) -> anyhow::Result<User> {
        self.create_user(UserRole::Agent).await
    }

    pub async fn create_admin(&self) -> anyhow::Result<User> {
        self.create_user(UserRole::Admin).await
    }

    /// Starts a plan purchase at catalog price on the JazzCash fake.
    pub async fn buy_plan(
        &self,
        user_id: Uuid,
        tier: PlanTier,
        period: BillingPeriod,
    ) -> anyhow::Result<ChargeReceipt> {
        let plan = self.ctx.entitlement_service.get_plan(tier).await?;
        let receipt = self
            .ctx
            .payment_service
            .create_charge(NewCharge {
                user_id,
                amount_minor: plan.price_for(period),
                currency: "PKR".to_string(),
                description: format!("{} plan", plan.name),
                gateway: GatewayId::JazzCash,
                plan_tier: Some(tier),
                billing_period: Some(period),
                return_url: None,
            })
            .await?;
        Ok(receipt)
    }

    /// Buys `tier` and delivers the provider's success callback.
    pub async fn activate_plan(
        &self,
        user_id: Uuid,
        tier: PlanTier,
        period: BillingPeriod,
    ) -> anyhow::Result<ChargeReceipt> {
        let receipt = self.buy_plan(user_id, tier, period).await?;
        let payment = self.ctx.payment_service.get_payment(receipt.payment_id).await?;
        let callback = self
            .jazzcash
            .callback(&receipt.provider_reference, true, Some(payment.amount_minor));
        self.ctx
            .reconciler
            .handle_callback(GatewayId::JazzCash, callback)
            .await?;
        Ok(receipt)
    }

    /// Moves a subscription window, keeping `start_date <= end_date`.
    pub async fn set_subscription_window(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE subscriptions SET start_date = ?, end_date = ? WHERE user_id = ?")
            .bind(start.naive_utc())
            .bind(end.naive_utc())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

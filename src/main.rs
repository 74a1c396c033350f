use std::{sync::Arc, time::Duration};

use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agentpay::{
    api,
    config::Settings,
    notifications::{EmailChannel, NotificationDispatcher, NotificationService, SmsChannel},
    payments::GatewayRegistry,
    repository::{PlanRepository, SqliteUserRepository},
    service::{ServiceContext, SweepService},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentpay=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}. Using defaults.", e);
        Settings::default()
    });

    tracing::info!("Starting AgentPay server on {}:{}", settings.server.host, settings.server.port);

    // Initialize database
    let db_pool = SqlitePoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await?;

    // Notification channels
    let user_repo = Arc::new(SqliteUserRepository::new(db_pool.clone()));
    let notifications = &settings.notifications;
    let mut notification_service =
        NotificationService::new(db_pool.clone(), user_repo, notifications.timeout_secs);

    if let Some(email) = EmailChannel::new(notifications.email.clone()) {
        notification_service.register(Arc::new(email));
    }
    if let Some(sms) = SmsChannel::new(notifications.sms.clone(), notifications.timeout_secs) {
        notification_service.register(Arc::new(sms));
    }
    let notifier: Arc<dyn NotificationDispatcher> = Arc::new(notification_service);

    // Payment gateways
    let gateways = GatewayRegistry::from_settings(&settings);
    log_gateway_configuration(&settings);

    // Create service context
    let service_context = Arc::new(ServiceContext::new(
        db_pool.clone(),
        &settings,
        gateways,
        notifier,
    ));

    let plans = service_context.plan_repo.seed_defaults().await?;
    tracing::info!("Plan catalog ready ({} tiers)", plans.len());

    if settings.scheduler.enabled {
        spawn_scheduler(
            service_context.sweep_service.clone(),
            settings.scheduler.interval_secs,
        );
    }

    let app = api::create_app(service_context, Arc::new(settings.clone()));

    let listener = tokio::net::TcpListener::bind(
        format!("{}:{}", settings.server.host, settings.server.port)
    ).await?;

    tracing::info!("Server listening on http://{}:{}", settings.server.host, settings.server.port);

    axum::serve(listener, app).await?;

    Ok(())
}

fn log_gateway_configuration(settings: &Settings) {
    let gateways = &settings.gateways;
    let configured = [
        ("JazzCash", gateways.jazzcash.as_ref().map(|c| !c.merchant_id.is_empty())),
        ("Easypaisa", gateways.easypaisa.as_ref().map(|c| !c.merchant_id.is_empty())),
        (
            "Stripe",
            gateways
                .stripe
                .as_ref()
                .map(|c| c.secret_key.as_deref().is_some_and(|k| !k.is_empty())),
        ),
    ];

    for (name, state) in configured {
        match state {
            Some(true) => tracing::info!("{} payments enabled", name),
            _ => tracing::warn!("{} is not configured; charges through it will be refused", name),
        }
    }
}

/// In-process stand-in for the external scheduler. Each sweep is
/// re-entrant, so overlapping with an external trigger is harmless.
fn spawn_scheduler(sweeps: Arc<SweepService>, interval_secs: u64) {
    tracing::info!("Built-in scheduler running every {}s", interval_secs);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            let now = Utc::now();

            match sweeps.run_expiry(now).await {
                Ok(report) => tracing::info!(
                    "Expiry sweep: {} expired, {} re-driven",
                    report.expired,
                    report.redriven
                ),
                Err(e) => tracing::error!("Expiry sweep failed: {}", e),
            }

            match sweeps.run_reminders(now).await {
                Ok(report) => tracing::info!(
                    "Reminder sweep: {} sent, {} suppressed, {} failed",
                    report.sent,
                    report.suppressed,
                    report.failed
                ),
                Err(e) => tracing::error!("Reminder sweep failed: {}", e),
            }

            match sweeps.run_renewals(now).await {
                Ok(report) => tracing::info!(
                    "Renewal sweep: {} renewed, {} skipped",
                    report.renewed,
                    report.skipped
                ),
                Err(e) => tracing::error!("Renewal sweep failed: {}", e),
            }
        }
    });
}

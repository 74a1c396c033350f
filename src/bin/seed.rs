use agentpay::{
    domain::{
        BillingPeriod, CreateUserRequest, GatewayId, Payment, PaymentPurpose, PaymentTransition,
        PlanTier, Subscription, UserRole, default_plan_tiers,
    },
    repository::{
        PaymentRepository, PlanRepository, SubscriptionRepository, UserRepository,
        SqlitePaymentRepository, SqlitePlanRepository, SqliteSubscriptionRepository,
        SqliteUserRepository,
    },
};
use chrono::Utc;
use clap::Parser;
use fake::{
    Fake,
    faker::{internet::en::SafeEmail, name::en::Name, phone_number::en::PhoneNumber},
};
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

/// Seeds a development database with the plan catalog, an admin and demo agents.
#[derive(Parser, Debug)]
#[command(name = "seed")]
struct Args {
    /// SQLite connection string.
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://agentpay.db?mode=rwc")]
    database_url: String,

    /// Number of demo agents to create.
    #[arg(long, default_value_t = 6)]
    agents: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    println!("🌱 Starting database seeding...");

    let db_pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&args.database_url)
        .await?;

    // Run migrations first
    println!("📋 Running migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await?;

    let user_repo = SqliteUserRepository::new(db_pool.clone());
    let plan_repo = SqlitePlanRepository::new(db_pool.clone());
    let subscription_repo = SqliteSubscriptionRepository::new(db_pool.clone());
    let payment_repo = SqlitePaymentRepository::new(db_pool.clone());

    println!("📦 Seeding plan catalog...");
    let plans = plan_repo.seed_defaults().await?;
    println!("  ✅ {} plan tiers available", plans.len());

    println!("👥 Creating users...");
    let admin_email = "admin@agentpay.local";
    let admin = match user_repo.find_by_email(admin_email).await? {
        Some(existing) => existing,
        None => {
            user_repo
                .create(CreateUserRequest {
                    email: admin_email.to_string(),
                    full_name: "Platform Admin".to_string(),
                    phone: None,
                    role: UserRole::Admin,
                })
                .await?
        }
    };
    println!("  ✅ Admin {} ({})", admin.email, admin.id);

    // Cycle demo agents through the paid tiers, leaving some on Free
    let tiers = [
        None,
        Some((PlanTier::Starter, BillingPeriod::Monthly)),
        Some((PlanTier::Professional, BillingPeriod::Monthly)),
        Some((PlanTier::Premium, BillingPeriod::Yearly)),
    ];
    let catalog = default_plan_tiers();

    for i in 0..args.agents {
        let email: String = SafeEmail().fake();
        let agent = user_repo
            .create(CreateUserRequest {
                email: format!("{}.{}", i, email),
                full_name: Name().fake(),
                phone: Some(PhoneNumber().fake()),
                role: UserRole::Agent,
            })
            .await?;

        let Some((tier, period)) = tiers[i % tiers.len()] else {
            println!("  • {} on Free", agent.email);
            continue;
        };

        let Some(plan) = catalog.iter().find(|p| p.tier == tier) else {
            continue;
        };
        let amount = plan.price_for(period);

        let mut payment = Payment::new_pending(
            agent.id,
            amount,
            "PKR",
            GatewayId::JazzCash,
            format!("{} plan ({})", plan.name, period.as_str()),
            PaymentPurpose::PlanPurchase {
                tier,
                billing_period: period,
            },
        );
        payment.provider_reference = Some(format!("AP{}", payment.id.simple()).to_uppercase());
        let payment = payment_repo.create(payment).await?;
        payment_repo
            .transition(
                payment.id,
                PaymentTransition::Complete {
                    provider_transaction_id: Some(format!("SEED-{}", Uuid::new_v4().simple())),
                },
            )
            .await?;
        payment_repo.claim_fulfilment(payment.id).await?;

        let now = Utc::now();
        subscription_repo
            .activate(Subscription {
                id: Uuid::new_v4(),
                user_id: agent.id,
                tier,
                billing_period: period,
                start_date: now,
                end_date: now + period.duration(),
                is_active: true,
                auto_renew: false,
                listings_used: 0,
                listings_limit: plan.max_listings as i64,
                created_at: now,
                updated_at: now,
            })
            .await?;

        println!("  • {} on {} ({})", agent.email, tier, period.as_str());
    }

    println!("\n✨ Database seeding complete!");
    println!("  Admin id for review/refund calls: {}", admin.id);

    Ok(())
}

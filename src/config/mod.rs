use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub gateways: GatewaysConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Fixed security deposit, in minor units of `currency`.
    #[serde(default = "default_security_deposit_minor")]
    pub security_deposit_minor: i64,
    #[serde(default = "default_reminder_window_days")]
    pub reminder_window_days: i64,
    #[serde(default = "default_renewal_window_hours")]
    pub renewal_window_hours: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewaysConfig {
    /// Upper bound on any outbound call to a payment provider.
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
    pub jazzcash: Option<WalletGatewayConfig>,
    pub easypaisa: Option<WalletGatewayConfig>,
    pub stripe: Option<StripeConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WalletGatewayConfig {
    pub merchant_id: String,
    pub password: String,
    pub return_url: String,
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
    /// Maximum accepted age of a signed webhook envelope.
    #[serde(default = "default_stripe_tolerance_secs")]
    pub tolerance_secs: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationsConfig {
    #[serde(default = "default_notification_timeout_secs")]
    pub timeout_secs: u64,
    pub email: Option<EmailConfig>,
    pub sms: Option<SmsConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmsConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key: String,
    pub sender: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Bearer token the external scheduler presents on the sweep endpoints.
    pub token: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_scheduler_interval_secs")]
    pub interval_secs: u64,
}

fn default_currency() -> String {
    "PKR".to_string()
}

fn default_security_deposit_minor() -> i64 {
    2_500_000
}

fn default_reminder_window_days() -> i64 {
    7
}

fn default_renewal_window_hours() -> i64 {
    24
}

fn default_gateway_timeout_secs() -> u64 {
    15
}

fn default_stripe_tolerance_secs() -> i64 {
    300
}

fn default_notification_timeout_secs() -> u64 {
    10
}

fn default_scheduler_interval_secs() -> u64 {
    3600
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            security_deposit_minor: default_security_deposit_minor(),
            reminder_window_days: default_reminder_window_days(),
            renewal_window_hours: default_renewal_window_hours(),
        }
    }
}

impl Default for GatewaysConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_gateway_timeout_secs(),
            jazzcash: None,
            easypaisa: None,
            stripe: None,
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_notification_timeout_secs(),
            email: None,
            sms: None,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            token: None,
            enabled: false,
            interval_secs: default_scheduler_interval_secs(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.base_url", "http://localhost:8080")?
            .set_default("database.url", "sqlite://agentpay.db?mode=rwc")?
            .set_default("database.max_connections", 10)?

            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))

            // Add environment variables (with AGENTPAY__ prefix, double underscore separates levels)
            .add_source(Environment::with_prefix("AGENTPAY").separator("__"))

            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                base_url: "http://localhost:8080".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://agentpay.db?mode=rwc".to_string(),
                max_connections: 10,
            },
            billing: BillingConfig::default(),
            gateways: GatewaysConfig::default(),
            notifications: NotificationsConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

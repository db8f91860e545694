use clubhouse_waitlist::PromotionPolicy;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub waitlist: WaitlistConfig,
    pub payments: PaymentsConfig,
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct WaitlistConfig {
    pub offer_ttl_hours: i64,
    pub max_promotion_attempts: u32,
    #[serde(default)]
    pub auto_charge: bool,
    #[serde(default)]
    pub requeue_expired: bool,
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_charge_timeout")]
    pub charge_timeout_seconds: u64,
}

fn default_charge_timeout() -> u64 { 10 }

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentsConfig {
    pub api_base: String,
    /// Empty selects the mock gateway
    #[serde(default)]
    pub secret_key: String,
    pub currency: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationsConfig {
    pub push_endpoint: String,
    pub email_relay_url: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_request_timeout() -> u64 { 10 }

impl WaitlistConfig {
    pub fn to_policy(&self) -> PromotionPolicy {
        PromotionPolicy {
            offer_ttl: chrono::Duration::hours(self.offer_ttl_hours),
            max_attempts: self.max_promotion_attempts,
            auto_charge: self.auto_charge,
            requeue_expired: self.requeue_expired,
            charge_timeout: Duration::from_secs(self.charge_timeout_seconds),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Untracked local overrides
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `CLUBHOUSE_WAITLIST__AUTO_CHARGE=true`
            .add_source(config::Environment::with_prefix("CLUBHOUSE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

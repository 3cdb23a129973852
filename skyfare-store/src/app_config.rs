use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub stripe: StripeSettings,
    pub paymob: PaymobSettings,
    #[serde(default)]
    pub booking: BookingRules,
    #[serde(default)]
    pub webhooks: WebhookSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: String,
    #[serde(default = "default_stripe_base")]
    pub api_base: String,
}

fn default_stripe_base() -> String {
    "https://api.stripe.com".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymobSettings {
    pub api_key: String,
    pub hmac_secret: String,
    pub integration_id: i64,
    #[serde(default = "default_paymob_base")]
    pub api_base: String,
}

fn default_paymob_base() -> String {
    "https://accept.paymob.com".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BookingRules {
    /// Minutes an unpaid booking may sit in PENDING before the sweeper
    /// cancels it.
    #[serde(default = "default_pending_timeout")]
    pub pending_timeout_minutes: i64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_pending_timeout() -> i64 {
    5
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            pending_timeout_minutes: default_pending_timeout(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WebhookSettings {
    /// Accept structurally valid provider callbacks whose signature does
    /// not verify. Sandbox dashboards sometimes replay events with stale
    /// signatures; never enable this where real money moves.
    #[serde(default)]
    pub allow_unverified: bool,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Add in the current environment file
            // Default to 'development' env
            // Note that this file is _optional_
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked in to git
            .add_source(config::File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of SKYFARE)
            // Eg.. `SKYFARE__SERVER__PORT=9000` would set the server port
            .add_source(config::Environment::with_prefix("SKYFARE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

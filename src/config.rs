use std::env;

/// Stripe price IDs for the two subscription tiers.
#[derive(Debug, Clone)]
pub struct SubscriptionPrices {
    pub monthly: String,
    pub yearly: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub audit_database_path: String,
    pub documents_dir: String,
    /// Public base URL of the web app, used for Stripe redirect targets.
    pub app_url: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub subscription_prices: SubscriptionPrices,
    pub bootstrap_admin_email: Option<String>,
    pub audit_log_enabled: bool,
    pub dev_mode: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("MOTORPACT_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let app_url =
            env::var("APP_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "motorpact.db".to_string()),
            audit_database_path: env::var("AUDIT_DATABASE_PATH")
                .unwrap_or_else(|_| "motorpact_audit.db".to_string()),
            documents_dir: env::var("DOCUMENTS_DIR")
                .unwrap_or_else(|_| "documents".to_string()),
            app_url,
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            subscription_prices: SubscriptionPrices {
                monthly: env::var("STRIPE_MONTHLY_PRICE_ID").unwrap_or_default(),
                yearly: env::var("STRIPE_YEARLY_PRICE_ID").unwrap_or_default(),
            },
            bootstrap_admin_email: env::var("BOOTSTRAP_ADMIN_EMAIL").ok(),
            audit_log_enabled: env::var("AUDIT_LOG_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            dev_mode,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

mod from_row;
pub mod queries;
mod schema;

pub use from_row::{query_all, query_one, FromRow};
pub use schema::{init_audit_db, init_db};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::SubscriptionPrices;
use crate::payments::StripeClient;
use crate::storage::DocumentStore;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Main database pool (users, customers, payments, invoices, documents)
    pub db: DbPool,
    /// Audit log database pool (separate file to isolate growth)
    pub audit: DbPool,
    pub stripe: StripeClient,
    pub documents: DocumentStore,
    /// Public base URL of the web app, used for Stripe redirect targets
    pub app_url: String,
    pub subscription_prices: SubscriptionPrices,
    pub audit_log_enabled: bool,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}

//! Test utilities and fixtures for MotorPact integration tests

#![allow(dead_code)]

use axum::Router;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

pub use motorpact::auth::{generate_session_token, hash_password, hash_token, SESSION_COOKIE};
pub use motorpact::config::SubscriptionPrices;
pub use motorpact::db::{init_audit_db, init_db, queries, AppState, DbPool};
pub use motorpact::handlers;
pub use motorpact::models::*;
pub use motorpact::payments::StripeClient;
pub use motorpact::storage::DocumentStore;

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

/// Create an in-memory test audit database with schema initialized
pub fn setup_test_audit_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory audit database");
    init_audit_db(&conn).expect("Failed to initialize audit schema");
    conn
}

/// Create a test user with a hashed password
pub fn create_test_user(conn: &Connection, email: &str, is_admin: bool) -> User {
    let password_hash = hash_password("test-password-123").expect("Failed to hash password");
    queries::create_user(conn, email, &password_hash, is_admin).expect("Failed to create test user")
}

/// Create a registered test customer (individual, monthly plan)
pub fn create_test_customer(conn: &Connection, user: &User, purchase_value_cents: i64) -> Customer {
    let input = CreateCustomer {
        account_type: AccountType::Individual,
        first_name: Some("Test".to_string()),
        last_name: Some("Customer".to_string()),
        date_of_birth: None,
        business_name: None,
        business_ein: None,
        business_contact_name: None,
        phone: None,
        address_line1: None,
        address_line2: None,
        city: None,
        state: None,
        zip_code: None,
        terms_accepted: true,
        purchase_value_cents,
        subscription_plan: SubscriptionPlan::Monthly,
    };
    queries::create_customer(conn, user, &input).expect("Failed to create test customer")
}

/// Record a succeeded payment directly
pub fn create_test_payment(
    conn: &Connection,
    customer_id: &str,
    payment_type: PaymentType,
    status: PaymentStatus,
    amount_cents: i64,
) -> Payment {
    queries::create_payment(
        conn,
        &CreatePayment {
            customer_id: customer_id.to_string(),
            payment_type,
            status,
            amount_cents,
            currency: "usd".to_string(),
            stripe_payment_intent_id: None,
            stripe_invoice_id: None,
            description: None,
        },
    )
    .expect("Failed to create test payment")
}

/// Open a session for a user and return the cookie header value
pub fn create_test_session(conn: &Connection, user_id: &str) -> String {
    let token = generate_session_token();
    queries::create_session(conn, user_id, &hash_token(&token), 3600)
        .expect("Failed to create test session");
    format!("{}={}", SESSION_COOKIE, token)
}

fn memory_pool() -> DbPool {
    // max_size(1): in-memory SQLite gives each connection its own database,
    // a single shared connection keeps state visible across requests.
    let manager = SqliteConnectionManager::memory();
    Pool::builder()
        .max_size(1)
        .build(manager)
        .expect("Failed to create in-memory pool")
}

/// Create an AppState for testing with in-memory databases.
/// The Stripe client points at real keys but no test here lets a request
/// reach the network.
pub fn create_test_app_state() -> AppState {
    let db = memory_pool();
    let audit = memory_pool();

    {
        let conn = db.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize schema");
    }
    {
        let conn = audit.get().expect("Failed to get audit connection");
        init_audit_db(&conn).expect("Failed to initialize audit schema");
    }

    AppState {
        db,
        audit,
        stripe: StripeClient::new("sk_test_xxx".to_string(), TEST_WEBHOOK_SECRET.to_string()),
        documents: DocumentStore::new(std::env::temp_dir().join("motorpact-test-docs")),
        app_url: "http://localhost:3000".to_string(),
        subscription_prices: SubscriptionPrices {
            monthly: "price_monthly_test".to_string(),
            yearly: "price_yearly_test".to_string(),
        },
        audit_log_enabled: true,
    }
}

/// Full application router over the given state
pub fn test_app(state: AppState) -> Router {
    handlers::router(state)
}

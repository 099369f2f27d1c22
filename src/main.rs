use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::time::Duration;

use motorpact::auth::hash_password;
use motorpact::config::Config;
use motorpact::db::{create_pool, init_audit_db, init_db, queries, AppState};
use motorpact::handlers;
use motorpact::models::{AccountType, AuditAction, CreateCustomer, SubscriptionPlan};
use motorpact::payments::StripeClient;
use motorpact::storage::DocumentStore;

#[derive(Parser, Debug)]
#[command(name = "motorpact")]
#[command(about = "Customer portal and billing backend for vehicle financing")]
struct Cli {
    /// Seed the database with dev data (admin, customer, sample payments)
    #[arg(long)]
    seed: bool,

    /// Delete databases on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Create the first admin user if none exists. The generated password is
/// printed once; there is no other way to recover it.
fn bootstrap_admin(state: &AppState, email: &str) {
    let conn = state.db.get().expect("Failed to get db connection for bootstrap");
    let audit_conn = state.audit.get().expect("Failed to get audit db connection");

    match queries::get_user_by_email(&conn, email) {
        Ok(Some(_)) => {
            tracing::info!("Bootstrap admin already exists, skipping");
            return;
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!("Bootstrap admin lookup failed: {}", e);
            return;
        }
    }

    let password = motorpact::auth::generate_session_token();
    let password_hash = hash_password(&password).expect("Failed to hash bootstrap password");
    let admin = queries::create_user(&conn, email, &password_hash, true)
        .expect("Failed to create bootstrap admin");

    queries::create_audit_log(
        &audit_conn,
        state.audit_log_enabled,
        None,
        Some(&admin.id),
        AuditAction::SignUp,
        Some(&serde_json::json!({ "bootstrap": true }).to_string()),
        None,
    )
    .expect("Failed to create audit log for bootstrap");

    tracing::info!("============================================");
    tracing::info!("BOOTSTRAP ADMIN CREATED");
    tracing::info!("Email: {}", email);
    tracing::info!("Password: {}", password);
    tracing::info!("============================================");
    tracing::info!("SAVE THIS PASSWORD - IT WILL NOT BE SHOWN AGAIN");
    tracing::info!("============================================");
}

/// Seeds the database with dev data for testing.
/// Creates: admin user, portal user, and a registered customer.
/// Only runs in dev mode and when the database is empty.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let count = queries::count_customers(&conn, None).expect("Failed to count customers");
    if count > 0 {
        tracing::info!("Database already has data, skipping seed");
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let admin_hash = hash_password("admin-dev-password").expect("Failed to hash seed password");
    let admin = queries::create_user(&conn, "admin@motorpact.local", &admin_hash, true)
        .expect("Failed to create dev admin");
    tracing::info!("Admin: {} / admin-dev-password", admin.email);

    let user_hash = hash_password("customer-dev-password").expect("Failed to hash seed password");
    let user = queries::create_user(&conn, "customer@motorpact.local", &user_hash, false)
        .expect("Failed to create dev user");

    let customer = queries::create_customer(
        &conn,
        &user,
        &CreateCustomer {
            account_type: AccountType::Individual,
            first_name: Some("Dev".into()),
            last_name: Some("Customer".into()),
            date_of_birth: None,
            business_name: None,
            business_ein: None,
            business_contact_name: None,
            phone: None,
            address_line1: Some("1 Test Drive".into()),
            address_line2: None,
            city: Some("Springfield".into()),
            state: Some("IL".into()),
            zip_code: Some("62704".into()),
            terms_accepted: true,
            purchase_value_cents: 2_500_000,
            subscription_plan: SubscriptionPlan::Monthly,
        },
    )
    .expect("Failed to create dev customer");

    tracing::info!("Customer: {} / customer-dev-password", user.email);
    tracing::info!(
        "Customer {} requires deposit of {} cents",
        customer.id,
        customer.security_deposit_required_cents
    );

    tracing::info!("============================================");
    tracing::info!("DEV DATA SEEDED SUCCESSFULLY");
    tracing::info!("============================================");

    println!();
    println!("--- COPY FROM HERE ---");
    println!("  admin_email: {}", admin.email);
    println!("  customer_email: {}", user.email);
    println!("  customer_id: {}", customer.id);
    println!("--- END COPY ---");
    println!();
}

/// Spawns a background task that periodically deletes expired sessions.
fn spawn_session_purge_task(state: AppState) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(60 * 60); // hourly

        loop {
            tokio::time::sleep(interval).await;

            match state.db.get() {
                Ok(conn) => match queries::purge_expired_sessions(&conn) {
                    Ok(count) => {
                        if count > 0 {
                            tracing::debug!("Purged {} expired sessions", count);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to purge expired sessions: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to get db connection for session purge: {}", e);
                }
            }
        }
    });

    tracing::info!("Background session purge task started (runs hourly)");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "motorpact=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    let audit_pool =
        create_pool(&config.audit_database_path).expect("Failed to create audit database pool");

    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }
    {
        let conn = audit_pool.get().expect("Failed to get audit connection");
        init_audit_db(&conn).expect("Failed to initialize audit database");
    }

    let state = AppState {
        db: db_pool,
        audit: audit_pool,
        stripe: StripeClient::new(
            config.stripe_secret_key.clone(),
            config.stripe_webhook_secret.clone(),
        ),
        documents: DocumentStore::new(&config.documents_dir),
        app_url: config.app_url.clone(),
        subscription_prices: config.subscription_prices.clone(),
        audit_log_enabled: config.audit_log_enabled,
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set MOTORPACT_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    if let Some(ref email) = config.bootstrap_admin_email {
        bootstrap_admin(&state, email);
    }

    spawn_session_purge_task(state.clone());

    let app = handlers::router(state).layer(TraceLayer::new_for_http());

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();
    let audit_path = config.audit_database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: databases will be deleted on exit");
    }

    tracing::info!("MotorPact server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral databases...");
        for path in [&db_path, &audit_path] {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!("Failed to remove {}: {}", path, e);
            } else {
                tracing::info!("Removed {}", path);
            }
            let _ = std::fs::remove_file(format!("{}-wal", path));
            let _ = std::fs::remove_file(format!("{}-shm", path));
        }
        tracing::info!("Ephemeral cleanup complete");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}

use rusqlite::Connection;

/// Initialize the main database schema (everything except audit logs)
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Users (authentication identity)
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            is_admin INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);

        -- Browser sessions (token stored as SHA-256 hash)
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            token_hash TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_token ON sessions(token_hash);
        CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);

        -- Customers (the financed individual or business, one per user)
        -- All monetary columns are integer cents
        CREATE TABLE IF NOT EXISTS customers (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
            customer_number TEXT UNIQUE,
            account_type TEXT NOT NULL CHECK (account_type IN ('individual', 'business')),
            account_status TEXT NOT NULL CHECK (account_status IN ('draft', 'payment_pending', 'active', 'closed')),

            first_name TEXT,
            last_name TEXT,
            date_of_birth TEXT,
            business_name TEXT,
            business_ein TEXT,
            business_contact_name TEXT,

            email TEXT NOT NULL,
            phone TEXT,
            address_line1 TEXT,
            address_line2 TEXT,
            city TEXT,
            state TEXT,
            zip_code TEXT,

            terms_accepted INTEGER NOT NULL DEFAULT 0,
            terms_accepted_at INTEGER,

            purchase_value_cents INTEGER NOT NULL DEFAULT 0,
            security_deposit_required_cents INTEGER NOT NULL DEFAULT 0,
            security_deposit_paid_cents INTEGER NOT NULL DEFAULT 0,
            account_balance_cents INTEGER NOT NULL DEFAULT 0,

            stripe_customer_id TEXT UNIQUE,
            subscription_plan TEXT CHECK (subscription_plan IS NULL OR subscription_plan IN ('monthly', 'yearly')),
            subscription_status TEXT,
            stripe_subscription_id TEXT UNIQUE,
            subscription_current_period_end INTEGER,

            vehicle_title_status TEXT NOT NULL DEFAULT 'pending' CHECK (vehicle_title_status IN ('pending', 'mailed', 'completed')),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_customers_user ON customers(user_id);
        CREATE INDEX IF NOT EXISTS idx_customers_status ON customers(account_status);
        CREATE INDEX IF NOT EXISTS idx_customers_stripe ON customers(stripe_customer_id);
        CREATE INDEX IF NOT EXISTS idx_customers_subscription ON customers(stripe_subscription_id);

        -- Uploaded verification documents (file bytes live on disk)
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            customer_id TEXT NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
            document_type TEXT NOT NULL CHECK (document_type IN ('drivers_license_front', 'drivers_license_back', 'business_registration')),
            file_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            content_type TEXT,
            uploaded_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_documents_customer ON documents(customer_id);

        -- Payments recorded by the webhook reconciler
        CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            customer_id TEXT NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
            payment_type TEXT NOT NULL CHECK (payment_type IN ('security_deposit', 'subscription', 'deposit_topup', 'refund')),
            status TEXT NOT NULL CHECK (status IN ('pending', 'succeeded', 'failed', 'refunded')),
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'usd',
            stripe_payment_intent_id TEXT,
            stripe_invoice_id TEXT,
            description TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_payments_customer ON payments(customer_id);
        CREATE INDEX IF NOT EXISTS idx_payments_status ON payments(status);
        CREATE INDEX IF NOT EXISTS idx_payments_created ON payments(created_at);

        -- Local mirror of Stripe invoices
        CREATE TABLE IF NOT EXISTS invoices (
            id TEXT PRIMARY KEY,
            customer_id TEXT NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
            stripe_invoice_id TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL CHECK (status IN ('draft', 'open', 'paid', 'void', 'uncollectible')),
            amount_due_cents INTEGER NOT NULL,
            amount_paid_cents INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'usd',
            hosted_invoice_url TEXT,
            invoice_pdf_url TEXT,
            period_start INTEGER,
            period_end INTEGER,
            due_date INTEGER,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_invoices_customer ON invoices(customer_id);
        "#,
    )
}

/// Initialize the audit log database (separate file, WAL mode for
/// write-heavy append workload)
pub fn init_audit_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;

        CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            customer_id TEXT,
            user_id TEXT,
            action TEXT NOT NULL,
            details TEXT,
            ip_address TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_customer ON audit_logs(customer_id);
        CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_logs(action);
        CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_logs(created_at);
        "#,
    )
}

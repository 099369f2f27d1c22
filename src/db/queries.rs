use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::Result;
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    query_all, query_one, AUDIT_LOG_COLS, CUSTOMER_COLS, DOCUMENT_COLS, INVOICE_COLS,
    PAYMENT_COLS, PAYMENT_WITH_CUSTOMER_COLS, SESSION_COLS, USER_COLS,
};

pub fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Users ============

pub fn create_user(
    conn: &Connection,
    email: &str,
    password_hash: &str,
    is_admin: bool,
) -> Result<User> {
    let id = EntityType::User.gen_id();
    let now = now();
    let email = email.trim().to_lowercase();

    conn.execute(
        "INSERT INTO users (id, email, password_hash, is_admin, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![&id, &email, password_hash, is_admin as i32, now, now],
    )?;

    Ok(User {
        id,
        email,
        password_hash: password_hash.to_string(),
        is_admin,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        &[&id],
    )
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let email = email.trim().to_lowercase();
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE email = ?1", USER_COLS),
        &[&email],
    )
}

// ============ Sessions ============

pub fn create_session(
    conn: &Connection,
    user_id: &str,
    token_hash: &str,
    ttl_secs: i64,
) -> Result<Session> {
    let id = EntityType::Session.gen_id();
    let now = now();
    let expires_at = now + ttl_secs;

    conn.execute(
        "INSERT INTO sessions (id, user_id, token_hash, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, user_id, token_hash, now, expires_at],
    )?;

    Ok(Session {
        id,
        user_id: user_id.to_string(),
        token_hash: token_hash.to_string(),
        created_at: now,
        expires_at,
    })
}

/// Resolve a session token hash to its user, ignoring expired sessions.
pub fn get_user_by_session_token(conn: &Connection, token_hash: &str) -> Result<Option<User>> {
    query_one(
        conn,
        "SELECT u.id, u.email, u.password_hash, u.is_admin, u.created_at, u.updated_at
         FROM users u
         JOIN sessions s ON s.user_id = u.id
         WHERE s.token_hash = ?1 AND s.expires_at > ?2",
        &[&token_hash, &now()],
    )
}

pub fn get_session_by_token(conn: &Connection, token_hash: &str) -> Result<Option<Session>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM sessions WHERE token_hash = ?1 AND expires_at > ?2",
            SESSION_COLS
        ),
        &[&token_hash, &now()],
    )
}

pub fn delete_session(conn: &Connection, token_hash: &str) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM sessions WHERE token_hash = ?1",
        params![token_hash],
    )?;
    Ok(affected > 0)
}

pub fn purge_expired_sessions(conn: &Connection) -> Result<usize> {
    let affected = conn.execute(
        "DELETE FROM sessions WHERE expires_at <= ?1",
        params![now()],
    )?;
    Ok(affected)
}

// ============ Customers ============

/// Create a customer record from a registration. Computes the required
/// security deposit and starts the account in `payment_pending`.
pub fn create_customer(conn: &Connection, user: &User, input: &CreateCustomer) -> Result<Customer> {
    let id = EntityType::Customer.gen_id();
    let now = now();
    let deposit = security_deposit_cents(input.purchase_value_cents);
    let customer_number = next_customer_number(conn)?;

    conn.execute(
        "INSERT INTO customers (
            id, user_id, customer_number, account_type, account_status,
            first_name, last_name, date_of_birth,
            business_name, business_ein, business_contact_name,
            email, phone, address_line1, address_line2, city, state, zip_code,
            terms_accepted, terms_accepted_at,
            purchase_value_cents, security_deposit_required_cents,
            security_deposit_paid_cents, account_balance_cents,
            subscription_plan, vehicle_title_status, created_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
            ?16, ?17, ?18, ?19, ?20, ?21, ?22, 0, 0, ?23, 'pending', ?24, ?24
        )",
        params![
            &id,
            &user.id,
            &customer_number,
            input.account_type.as_ref(),
            AccountStatus::PaymentPending.as_ref(),
            &input.first_name,
            &input.last_name,
            &input.date_of_birth,
            &input.business_name,
            &input.business_ein,
            &input.business_contact_name,
            &user.email,
            &input.phone,
            &input.address_line1,
            &input.address_line2,
            &input.city,
            &input.state,
            &input.zip_code,
            1i32,
            now,
            input.purchase_value_cents,
            deposit,
            input.subscription_plan.as_ref(),
            now,
        ],
    )?;

    get_customer_by_id(conn, &id)?.ok_or_else(|| {
        crate::error::AppError::Internal("customer vanished after insert".to_string())
    })
}

/// Sequential human-facing customer numbers: MP-10001, MP-10002, ...
fn next_customer_number(conn: &Connection) -> Result<String> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM customers", [], |row| row.get(0))?;
    Ok(format!("MP-{}", 10_001 + count))
}

pub fn get_customer_by_id(conn: &Connection, id: &str) -> Result<Option<Customer>> {
    query_one(
        conn,
        &format!("SELECT {} FROM customers WHERE id = ?1", CUSTOMER_COLS),
        &[&id],
    )
}

pub fn get_customer_by_user_id(conn: &Connection, user_id: &str) -> Result<Option<Customer>> {
    query_one(
        conn,
        &format!("SELECT {} FROM customers WHERE user_id = ?1", CUSTOMER_COLS),
        &[&user_id],
    )
}

pub fn get_customer_by_subscription_id(
    conn: &Connection,
    stripe_subscription_id: &str,
) -> Result<Option<Customer>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM customers WHERE stripe_subscription_id = ?1",
            CUSTOMER_COLS
        ),
        &[&stripe_subscription_id],
    )
}

pub fn get_customer_by_stripe_customer_id(
    conn: &Connection,
    stripe_customer_id: &str,
) -> Result<Option<Customer>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM customers WHERE stripe_customer_id = ?1",
            CUSTOMER_COLS
        ),
        &[&stripe_customer_id],
    )
}

/// Link a Stripe subscription to a customer when an event resolved the
/// customer through metadata rather than the stored subscription id.
pub fn link_customer_subscription(
    conn: &Connection,
    customer_id: &str,
    stripe_subscription_id: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE customers SET stripe_subscription_id = ?1, updated_at = ?2
         WHERE id = ?3 AND stripe_subscription_id IS NULL",
        params![stripe_subscription_id, now(), customer_id],
    )?;
    Ok(affected > 0)
}

pub fn update_customer_stripe_id(
    conn: &Connection,
    customer_id: &str,
    stripe_customer_id: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE customers SET stripe_customer_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![stripe_customer_id, now(), customer_id],
    )?;
    Ok(affected > 0)
}

/// Transition an account to active after the initial checkout completes.
/// Records the deposit as paid and links the subscription.
pub fn activate_customer(
    conn: &Connection,
    customer_id: &str,
    deposit_paid_cents: i64,
    stripe_subscription_id: Option<&str>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE customers SET
            account_status = 'active',
            security_deposit_paid_cents = ?1,
            stripe_subscription_id = COALESCE(?2, stripe_subscription_id),
            subscription_status = 'active',
            updated_at = ?3
         WHERE id = ?4",
        params![deposit_paid_cents, stripe_subscription_id, now(), customer_id],
    )?;
    Ok(affected > 0)
}

/// Sync subscription state from a Stripe subscription event. Optionally
/// backfills the paid deposit when the subscription metadata carries it and
/// the local record never saw checkout completion.
pub fn update_customer_subscription(
    conn: &Connection,
    customer_id: &str,
    status: SubscriptionStatus,
    current_period_end: Option<i64>,
    backfill_deposit_paid_cents: Option<i64>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE customers SET
            subscription_status = ?1,
            subscription_current_period_end = COALESCE(?2, subscription_current_period_end),
            security_deposit_paid_cents = COALESCE(?3, security_deposit_paid_cents),
            updated_at = ?4
         WHERE id = ?5",
        params![
            status.as_ref(),
            current_period_end,
            backfill_deposit_paid_cents,
            now(),
            customer_id
        ],
    )?;
    Ok(affected > 0)
}

/// Close an account when its subscription is deleted.
pub fn close_customer(conn: &Connection, customer_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE customers SET
            account_status = 'closed',
            subscription_status = 'canceled',
            updated_at = ?1
         WHERE id = ?2",
        params![now(), customer_id],
    )?;
    Ok(affected > 0)
}

pub fn credit_account_balance(
    conn: &Connection,
    customer_id: &str,
    amount_cents: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE customers SET
            account_balance_cents = account_balance_cents + ?1,
            updated_at = ?2
         WHERE id = ?3",
        params![amount_cents, now(), customer_id],
    )?;
    Ok(affected > 0)
}

pub fn list_customers(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<Customer>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM customers ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
            CUSTOMER_COLS
        ),
        &[&limit, &offset],
    )
}

pub fn count_customers(conn: &Connection, status: Option<AccountStatus>) -> Result<i64> {
    let count = match status {
        Some(status) => conn.query_row(
            "SELECT COUNT(*) FROM customers WHERE account_status = ?1",
            params![status.as_ref()],
            |row| row.get(0),
        )?,
        None => conn.query_row("SELECT COUNT(*) FROM customers", [], |row| row.get(0))?,
    };
    Ok(count)
}

// ============ Documents ============

pub fn create_document(
    conn: &Connection,
    customer_id: &str,
    document_type: DocumentType,
    file_name: &str,
    file_path: &str,
    file_size: i64,
    content_type: Option<&str>,
) -> Result<Document> {
    let id = EntityType::Document.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO documents (id, customer_id, document_type, file_name, file_path, file_size, content_type, uploaded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            &id,
            customer_id,
            document_type.as_ref(),
            file_name,
            file_path,
            file_size,
            content_type,
            now
        ],
    )?;

    Ok(Document {
        id,
        customer_id: customer_id.to_string(),
        document_type,
        file_name: file_name.to_string(),
        file_path: file_path.to_string(),
        file_size,
        content_type: content_type.map(str::to_string),
        uploaded_at: now,
    })
}

pub fn get_documents_by_customer(conn: &Connection, customer_id: &str) -> Result<Vec<Document>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM documents WHERE customer_id = ?1 ORDER BY uploaded_at DESC",
            DOCUMENT_COLS
        ),
        &[&customer_id],
    )
}

// ============ Payments ============

pub fn create_payment(conn: &Connection, input: &CreatePayment) -> Result<Payment> {
    let id = EntityType::Payment.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO payments (id, customer_id, payment_type, status, amount_cents, currency,
            stripe_payment_intent_id, stripe_invoice_id, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            &id,
            &input.customer_id,
            input.payment_type.as_ref(),
            input.status.as_ref(),
            input.amount_cents,
            &input.currency,
            &input.stripe_payment_intent_id,
            &input.stripe_invoice_id,
            &input.description,
            now
        ],
    )?;

    Ok(Payment {
        id,
        customer_id: input.customer_id.clone(),
        payment_type: input.payment_type,
        status: input.status,
        amount_cents: input.amount_cents,
        currency: input.currency.clone(),
        stripe_payment_intent_id: input.stripe_payment_intent_id.clone(),
        stripe_invoice_id: input.stripe_invoice_id.clone(),
        description: input.description.clone(),
        created_at: now,
    })
}

pub fn get_payments_by_customer(
    conn: &Connection,
    customer_id: &str,
    limit: i64,
) -> Result<Vec<Payment>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE customer_id = ?1 ORDER BY created_at DESC LIMIT ?2",
            PAYMENT_COLS
        ),
        &[&customer_id, &limit],
    )
}

/// Aggregate totals over succeeded payments only. Top ups count toward the
/// deposit bucket.
pub fn succeeded_payment_totals(conn: &Connection) -> Result<PaymentStats> {
    conn.query_row(
        "SELECT
            COALESCE(SUM(amount_cents), 0),
            COALESCE(SUM(CASE WHEN payment_type IN ('security_deposit', 'deposit_topup') THEN amount_cents ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN payment_type = 'subscription' THEN amount_cents ELSE 0 END), 0),
            COUNT(*)
         FROM payments WHERE status = 'succeeded'",
        [],
        |row| {
            Ok(PaymentStats {
                total_collected_cents: row.get(0)?,
                deposit_collected_cents: row.get(1)?,
                subscription_collected_cents: row.get(2)?,
                payment_count: row.get(3)?,
            })
        },
    )
    .map_err(Into::into)
}

pub fn recent_payments_with_customer(
    conn: &Connection,
    limit: i64,
) -> Result<Vec<PaymentWithCustomer>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payments p
             JOIN customers c ON c.id = p.customer_id
             ORDER BY p.created_at DESC LIMIT ?1",
            PAYMENT_WITH_CUSTOMER_COLS
        ),
        &[&limit],
    )
}

// ============ Invoices ============

pub fn create_invoice(conn: &Connection, input: &CreateInvoice) -> Result<Invoice> {
    let id = EntityType::Invoice.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO invoices (id, customer_id, stripe_invoice_id, status,
            amount_due_cents, amount_paid_cents, currency, hosted_invoice_url, invoice_pdf_url,
            period_start, period_end, due_date, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(stripe_invoice_id) DO UPDATE SET
            status = excluded.status,
            amount_paid_cents = excluded.amount_paid_cents,
            hosted_invoice_url = excluded.hosted_invoice_url,
            invoice_pdf_url = excluded.invoice_pdf_url",
        params![
            &id,
            &input.customer_id,
            &input.stripe_invoice_id,
            input.status.as_ref(),
            input.amount_due_cents,
            input.amount_paid_cents,
            &input.currency,
            &input.hosted_invoice_url,
            &input.invoice_pdf_url,
            input.period_start,
            input.period_end,
            input.due_date,
            now
        ],
    )?;

    get_invoice_by_stripe_id(conn, &input.stripe_invoice_id)?.ok_or_else(|| {
        crate::error::AppError::Internal("invoice vanished after upsert".to_string())
    })
}

pub fn get_invoice_by_stripe_id(
    conn: &Connection,
    stripe_invoice_id: &str,
) -> Result<Option<Invoice>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM invoices WHERE stripe_invoice_id = ?1",
            INVOICE_COLS
        ),
        &[&stripe_invoice_id],
    )
}

pub fn get_invoices_by_customer(
    conn: &Connection,
    customer_id: &str,
    limit: i64,
) -> Result<Vec<Invoice>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM invoices WHERE customer_id = ?1 ORDER BY created_at DESC LIMIT ?2",
            INVOICE_COLS
        ),
        &[&customer_id, &limit],
    )
}

// ============ Audit Logs ============

/// Append an audit entry. No-ops when auditing is disabled.
pub fn create_audit_log(
    conn: &Connection,
    enabled: bool,
    customer_id: Option<&str>,
    user_id: Option<&str>,
    action: AuditAction,
    details: Option<&str>,
    ip_address: Option<&str>,
) -> Result<()> {
    if !enabled {
        return Ok(());
    }
    let id = EntityType::AuditLog.gen_id();
    conn.execute(
        "INSERT INTO audit_logs (id, customer_id, user_id, action, details, ip_address, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &id,
            customer_id,
            user_id,
            action.as_ref(),
            details,
            ip_address,
            now()
        ],
    )?;
    Ok(())
}

pub fn list_audit_logs(conn: &Connection, query: &AuditLogQuery) -> Result<Vec<AuditLog>> {
    match (&query.customer_id, &query.action) {
        (Some(customer_id), Some(action)) => query_all(
            conn,
            &format!(
                "SELECT {} FROM audit_logs WHERE customer_id = ?1 AND action = ?2
                 ORDER BY created_at DESC LIMIT ?3 OFFSET ?4",
                AUDIT_LOG_COLS
            ),
            &[&customer_id, &action.as_ref(), &query.limit(), &query.offset()],
        ),
        (Some(customer_id), None) => query_all(
            conn,
            &format!(
                "SELECT {} FROM audit_logs WHERE customer_id = ?1
                 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
                AUDIT_LOG_COLS
            ),
            &[&customer_id, &query.limit(), &query.offset()],
        ),
        (None, Some(action)) => query_all(
            conn,
            &format!(
                "SELECT {} FROM audit_logs WHERE action = ?1
                 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
                AUDIT_LOG_COLS
            ),
            &[&action.as_ref(), &query.limit(), &query.offset()],
        ),
        (None, None) => query_all(
            conn,
            &format!(
                "SELECT {} FROM audit_logs ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
                AUDIT_LOG_COLS
            ),
            &[&query.limit(), &query.offset()],
        ),
    }
}

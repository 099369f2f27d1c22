//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors instead of panicking on bad database contents.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Like `parse_enum` but for nullable columns.
fn parse_enum_opt<T: std::str::FromStr>(
    row: &Row,
    col: usize,
    col_name: &str,
) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(col)? {
        None => Ok(None),
        Some(s) => s.parse::<T>().map(Some).map_err(|_| {
            rusqlite::Error::InvalidColumnType(
                col,
                col_name.to_string(),
                rusqlite::types::Type::Text,
            )
        }),
    }
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const USER_COLS: &str = "id, email, password_hash, is_admin, created_at, updated_at";

pub const SESSION_COLS: &str = "id, user_id, token_hash, created_at, expires_at";

pub const CUSTOMER_COLS: &str = "id, user_id, customer_number, account_type, account_status, \
    first_name, last_name, date_of_birth, business_name, business_ein, business_contact_name, \
    email, phone, address_line1, address_line2, city, state, zip_code, \
    terms_accepted, terms_accepted_at, \
    purchase_value_cents, security_deposit_required_cents, security_deposit_paid_cents, account_balance_cents, \
    stripe_customer_id, subscription_plan, subscription_status, stripe_subscription_id, subscription_current_period_end, \
    vehicle_title_status, created_at, updated_at";

pub const DOCUMENT_COLS: &str =
    "id, customer_id, document_type, file_name, file_path, file_size, content_type, uploaded_at";

pub const PAYMENT_COLS: &str = "id, customer_id, payment_type, status, amount_cents, currency, \
    stripe_payment_intent_id, stripe_invoice_id, description, created_at";

pub const PAYMENT_WITH_CUSTOMER_COLS: &str =
    "p.id, p.customer_id, p.payment_type, p.status, p.amount_cents, p.currency, \
    p.stripe_payment_intent_id, p.stripe_invoice_id, p.description, p.created_at, \
    c.email, c.account_type, c.first_name, c.last_name, c.business_name";

pub const INVOICE_COLS: &str = "id, customer_id, stripe_invoice_id, status, \
    amount_due_cents, amount_paid_cents, currency, hosted_invoice_url, invoice_pdf_url, \
    period_start, period_end, due_date, created_at";

pub const AUDIT_LOG_COLS: &str =
    "id, customer_id, user_id, action, details, ip_address, created_at";

// ============ FromRow Implementations ============

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            password_hash: row.get(2)?,
            is_admin: row.get::<_, i32>(3)? != 0,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

impl FromRow for Session {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Session {
            id: row.get(0)?,
            user_id: row.get(1)?,
            token_hash: row.get(2)?,
            created_at: row.get(3)?,
            expires_at: row.get(4)?,
        })
    }
}

impl FromRow for Customer {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Customer {
            id: row.get(0)?,
            user_id: row.get(1)?,
            customer_number: row.get(2)?,
            account_type: parse_enum(row, 3, "account_type")?,
            account_status: parse_enum(row, 4, "account_status")?,
            first_name: row.get(5)?,
            last_name: row.get(6)?,
            date_of_birth: row.get(7)?,
            business_name: row.get(8)?,
            business_ein: row.get(9)?,
            business_contact_name: row.get(10)?,
            email: row.get(11)?,
            phone: row.get(12)?,
            address_line1: row.get(13)?,
            address_line2: row.get(14)?,
            city: row.get(15)?,
            state: row.get(16)?,
            zip_code: row.get(17)?,
            terms_accepted: row.get::<_, i32>(18)? != 0,
            terms_accepted_at: row.get(19)?,
            purchase_value_cents: row.get(20)?,
            security_deposit_required_cents: row.get(21)?,
            security_deposit_paid_cents: row.get(22)?,
            account_balance_cents: row.get(23)?,
            stripe_customer_id: row.get(24)?,
            subscription_plan: parse_enum_opt(row, 25, "subscription_plan")?,
            subscription_status: parse_enum_opt(row, 26, "subscription_status")?,
            stripe_subscription_id: row.get(27)?,
            subscription_current_period_end: row.get(28)?,
            vehicle_title_status: parse_enum(row, 29, "vehicle_title_status")?,
            created_at: row.get(30)?,
            updated_at: row.get(31)?,
        })
    }
}

impl FromRow for Document {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Document {
            id: row.get(0)?,
            customer_id: row.get(1)?,
            document_type: parse_enum(row, 2, "document_type")?,
            file_name: row.get(3)?,
            file_path: row.get(4)?,
            file_size: row.get(5)?,
            content_type: row.get(6)?,
            uploaded_at: row.get(7)?,
        })
    }
}

impl FromRow for Payment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Payment {
            id: row.get(0)?,
            customer_id: row.get(1)?,
            payment_type: parse_enum(row, 2, "payment_type")?,
            status: parse_enum(row, 3, "status")?,
            amount_cents: row.get(4)?,
            currency: row.get(5)?,
            stripe_payment_intent_id: row.get(6)?,
            stripe_invoice_id: row.get(7)?,
            description: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}

impl FromRow for PaymentWithCustomer {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let payment = Payment::from_row(row)?;
        let email: String = row.get(10)?;
        let account_type: AccountType = parse_enum(row, 11, "account_type")?;
        let first_name: Option<String> = row.get(12)?;
        let last_name: Option<String> = row.get(13)?;
        let business_name: Option<String> = row.get(14)?;
        let customer_name = match account_type {
            AccountType::Business => business_name.unwrap_or_else(|| email.clone()),
            AccountType::Individual => match (first_name, last_name) {
                (Some(first), Some(last)) => format!("{} {}", first, last),
                _ => email.clone(),
            },
        };
        Ok(PaymentWithCustomer {
            payment,
            customer_email: email,
            customer_name,
        })
    }
}

impl FromRow for Invoice {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Invoice {
            id: row.get(0)?,
            customer_id: row.get(1)?,
            stripe_invoice_id: row.get(2)?,
            status: parse_enum(row, 3, "status")?,
            amount_due_cents: row.get(4)?,
            amount_paid_cents: row.get(5)?,
            currency: row.get(6)?,
            hosted_invoice_url: row.get(7)?,
            invoice_pdf_url: row.get(8)?,
            period_start: row.get(9)?,
            period_end: row.get(10)?,
            due_date: row.get(11)?,
            created_at: row.get(12)?,
        })
    }
}

impl FromRow for AuditLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(AuditLog {
            id: row.get(0)?,
            customer_id: row.get(1)?,
            user_id: row.get(2)?,
            action: parse_enum(row, 3, "action")?,
            details: row.get(4)?,
            ip_address: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

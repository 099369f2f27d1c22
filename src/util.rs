//! Shared utility functions for the MotorPact application.

use axum::http::HeaderMap;
use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::models::AuditAction;

/// Extract client IP address and user-agent from request headers.
///
/// Tries `x-forwarded-for` first (for proxied requests), then `x-real-ip`,
/// and extracts the `user-agent` header for audit logging.
pub fn extract_request_info(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    (ip, user_agent)
}

/// Parse a decimal major-unit amount string ("650", "650.5", "650.50") into
/// integer cents. Rejects more than two fractional digits and anything
/// non-numeric. Used for Stripe metadata values, which arrive as strings.
pub fn parse_major_units(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: i64 = whole.parse().ok()?;
    let frac_cents: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    whole.checked_mul(100)?.checked_add(frac_cents)
}

/// Format cents as a major-unit decimal string without trailing zeros
/// ("65000" cents -> "650", "65050" -> "650.50").
pub fn format_major_units(cents: i64) -> String {
    if cents % 100 == 0 {
        format!("{}", cents / 100)
    } else {
        format!("{}.{:02}", cents / 100, cents % 100)
    }
}

/// Builder for creating audit log entries.
///
/// # Example
/// ```ignore
/// AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
///     .customer(&customer.id)
///     .user(&user.id)
///     .action(AuditAction::DocumentUploaded)
///     .details(&serde_json::json!({ "document_type": "drivers_license" }))
///     .save()?;
/// ```
pub struct AuditLogBuilder<'a> {
    conn: &'a Connection,
    enabled: bool,
    headers: &'a HeaderMap,
    customer_id: Option<&'a str>,
    user_id: Option<&'a str>,
    action: AuditAction,
    details: Option<String>,
}

impl<'a> AuditLogBuilder<'a> {
    pub fn new(conn: &'a Connection, enabled: bool, headers: &'a HeaderMap) -> Self {
        Self {
            conn,
            enabled,
            headers,
            customer_id: None,
            user_id: None,
            action: AuditAction::Login, // Placeholder, should always be set
            details: None,
        }
    }

    pub fn customer(mut self, customer_id: &'a str) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    pub fn user(mut self, user_id: &'a str) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = action;
        self
    }

    pub fn details(mut self, details: &serde_json::Value) -> Self {
        self.details = Some(details.to_string());
        self
    }

    pub fn save(self) -> Result<()> {
        let (ip, _ua) = extract_request_info(self.headers);
        queries::create_audit_log(
            self.conn,
            self.enabled,
            self.customer_id,
            self.user_id,
            self.action,
            self.details.as_deref(),
            ip.as_deref(),
        )
    }
}

//! Admin dashboard: aggregate stats, customer roster, payment feed, audit
//! trail.

use axum::{
    extract::State,
    middleware,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::extractors::{Json, Query};
use crate::middleware::admin_auth;
use crate::models::{AccountStatus, AuditLog, AuditLogQuery, Customer, PaymentStats, PaymentWithCustomer};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/admin/stats", get(stats))
        .route("/admin/customers", get(list_customers))
        .route("/admin/payments", get(recent_payments))
        .route("/admin/audit-logs", get(audit_logs))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    total_customers: i64,
    active_customers: i64,
    pending_customers: i64,
    closed_customers: i64,
    payments: PaymentStats,
}

async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let conn = state.db.get()?;
    Ok(Json(StatsResponse {
        total_customers: queries::count_customers(&conn, None)?,
        active_customers: queries::count_customers(&conn, Some(AccountStatus::Active))?,
        pending_customers: queries::count_customers(&conn, Some(AccountStatus::PaymentPending))?,
        closed_customers: queries::count_customers(&conn, Some(AccountStatus::Closed))?,
        payments: queries::succeeded_payment_totals(&conn)?,
    }))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

impl PageQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 500)
    }

    fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

async fn list_customers(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Customer>>> {
    let conn = state.db.get()?;
    let customers = queries::list_customers(&conn, page.limit(), page.offset())?;
    Ok(Json(customers))
}

async fn recent_payments(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<PaymentWithCustomer>>> {
    let conn = state.db.get()?;
    let payments = queries::recent_payments_with_customer(&conn, page.limit())?;
    Ok(Json(payments))
}

async fn audit_logs(
    State(state): State<AppState>,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<Vec<AuditLog>>> {
    let conn = state.audit.get()?;
    let logs = queries::list_audit_logs(&conn, &query)?;
    Ok(Json(logs))
}

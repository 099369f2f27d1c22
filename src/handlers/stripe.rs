//! Checkout, top up, and billing portal initiators.
//!
//! These only create Stripe sessions; no local money state changes here.
//! All reconciliation happens in the webhook handler once Stripe confirms.

use axum::{
    extract::{Extension, State},
    http::HeaderMap,
    middleware,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::Json;
use crate::middleware::{session_auth, AuthContext};
use crate::models::{AccountStatus, AuditAction, Customer, SubscriptionPlan};
use crate::util::AuditLogBuilder;

/// Top ups must be at least $100 and at most $100,000.
pub const TOPUP_MIN_CENTS: i64 = 10_000;
pub const TOPUP_MAX_CENTS: i64 = 10_000_000;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stripe/checkout", post(create_checkout))
        .route("/stripe/topup", post(create_topup))
        .route("/stripe/portal", post(create_portal))
        .layer(middleware::from_fn_with_state(state.clone(), session_auth))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct CheckoutResponse {
    checkout_url: String,
    session_id: String,
}

/// Make sure the customer has a Stripe-side counterpart, creating one if the
/// registration-time attempt failed. Acquires its own pooled connection for
/// the write; callers must not hold one across this call.
async fn ensure_stripe_customer(state: &AppState, customer: &Customer) -> Result<String> {
    if let Some(ref id) = customer.stripe_customer_id {
        return Ok(id.clone());
    }
    let stripe_customer_id = state
        .stripe
        .create_customer(&customer.email, &customer.id)
        .await?;
    let conn = state.db.get()?;
    queries::update_customer_stripe_id(&conn, &customer.id, &stripe_customer_id)?;
    Ok(stripe_customer_id)
}

/// Start the initial deposit + subscription checkout.
async fn create_checkout(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
) -> Result<Json<CheckoutResponse>> {
    let conn = state.db.get()?;
    let customer = queries::get_customer_by_user_id(&conn, &ctx.user.id)?
        .or_not_found(msg::CUSTOMER_NOT_FOUND)?;

    if customer.account_status == AccountStatus::Active {
        return Err(AppError::Conflict("Account is already active".into()));
    }
    if customer.account_status == AccountStatus::Closed {
        return Err(AppError::Conflict("Account is closed".into()));
    }

    let plan = customer
        .subscription_plan
        .ok_or_else(|| AppError::BadRequest(msg::BILLING_PROFILE_NOT_FOUND.into()))?;
    let plan_price_id = match plan {
        SubscriptionPlan::Monthly => state.subscription_prices.monthly.clone(),
        SubscriptionPlan::Yearly => state.subscription_prices.yearly.clone(),
    };
    drop(conn);

    let stripe_customer_id = ensure_stripe_customer(&state, &customer).await?;

    let success_url = format!("{}/portal?checkout=success", state.app_url);
    let cancel_url = format!("{}/portal?checkout=canceled", state.app_url);

    let (session_id, checkout_url) = state
        .stripe
        .create_subscription_checkout(
            &stripe_customer_id,
            &customer.id,
            plan,
            &plan_price_id,
            customer.security_deposit_required_cents,
            customer.purchase_value_cents,
            &success_url,
            &cancel_url,
        )
        .await?;

    let audit_conn = state.audit.get()?;
    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .customer(&customer.id)
        .user(&ctx.user.id)
        .action(AuditAction::CheckoutStarted)
        .details(&serde_json::json!({
            "checkout_session": session_id,
            "plan": plan,
            "deposit_cents": customer.security_deposit_required_cents,
        }))
        .save()?;

    Ok(Json(CheckoutResponse {
        checkout_url,
        session_id,
    }))
}

#[derive(Debug, Deserialize)]
struct TopupRequest {
    amount_cents: i64,
}

/// Start a one-time account balance top up checkout.
async fn create_topup(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Json(request): Json<TopupRequest>,
) -> Result<Json<CheckoutResponse>> {
    if request.amount_cents < TOPUP_MIN_CENTS {
        return Err(AppError::BadRequest(msg::TOPUP_BELOW_MINIMUM.into()));
    }
    if request.amount_cents > TOPUP_MAX_CENTS {
        return Err(AppError::BadRequest(msg::TOPUP_ABOVE_MAXIMUM.into()));
    }

    let conn = state.db.get()?;
    let customer = queries::get_customer_by_user_id(&conn, &ctx.user.id)?
        .or_not_found(msg::CUSTOMER_NOT_FOUND)?;

    if customer.account_status != AccountStatus::Active {
        return Err(AppError::BadRequest("Account is not active".into()));
    }
    drop(conn);

    let stripe_customer_id = ensure_stripe_customer(&state, &customer).await?;

    let success_url = format!("{}/portal?topup=success", state.app_url);
    let cancel_url = format!("{}/portal?topup=canceled", state.app_url);

    let (session_id, checkout_url) = state
        .stripe
        .create_topup_checkout(
            &stripe_customer_id,
            &customer.id,
            request.amount_cents,
            &success_url,
            &cancel_url,
        )
        .await?;

    let audit_conn = state.audit.get()?;
    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .customer(&customer.id)
        .user(&ctx.user.id)
        .action(AuditAction::TopupStarted)
        .details(&serde_json::json!({
            "checkout_session": session_id,
            "amount_cents": request.amount_cents,
        }))
        .save()?;

    Ok(Json(CheckoutResponse {
        checkout_url,
        session_id,
    }))
}

#[derive(Debug, Serialize)]
struct PortalResponse {
    url: String,
}

/// Open the Stripe billing portal for subscription self-service.
async fn create_portal(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
) -> Result<Json<PortalResponse>> {
    let conn = state.db.get()?;
    let customer = queries::get_customer_by_user_id(&conn, &ctx.user.id)?
        .or_not_found(msg::CUSTOMER_NOT_FOUND)?;

    // No processor identity yet means there is nothing to open a portal for
    let stripe_customer_id = customer
        .stripe_customer_id
        .clone()
        .ok_or_else(|| AppError::NotFound(msg::BILLING_PROFILE_NOT_FOUND.into()))?;

    let return_url = format!("{}/portal", state.app_url);
    let url = state
        .stripe
        .create_portal_session(&stripe_customer_id, &return_url)
        .await?;

    let audit_conn = state.audit.get()?;
    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .customer(&customer.id)
        .user(&ctx.user.id)
        .action(AuditAction::PortalOpened)
        .save()?;

    Ok(Json(PortalResponse { url }))
}

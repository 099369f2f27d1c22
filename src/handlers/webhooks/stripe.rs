//! Stripe webhook reconciler.
//!
//! Stripe is the source of truth for money movement; this handler folds its
//! events back into the local customer, payment, and invoice records. Events
//! we cannot act on (unknown subscription, missing metadata) are acked with
//! 200 so Stripe stops retrying; only signature failures and parse errors get
//! error statuses.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use rusqlite::Connection;

use crate::db::{queries, AppState};
use crate::models::{
    AuditAction, CreateInvoice, CreatePayment, Customer, InvoiceStatus, PaymentStatus,
    PaymentType, SubscriptionStatus,
};
use crate::payments::{
    StripeCheckoutSession, StripeInvoice, StripeSubscription, StripeWebhookEvent,
};
use crate::util::parse_major_units;

/// Status plus a short human-readable reason, returned to Stripe.
pub type WebhookResult = (StatusCode, &'static str);

const ACK: WebhookResult = (StatusCode::OK, "ok");

/// The closed set of Stripe events this service reacts to.
pub enum StripeEvent {
    CheckoutCompleted(StripeCheckoutSession),
    InvoicePaid(StripeInvoice),
    InvoicePaymentFailed(StripeInvoice),
    InvoiceUpcoming(StripeInvoice),
    SubscriptionUpdated(StripeSubscription),
    SubscriptionDeleted(StripeSubscription),
    Ignored,
}

pub fn parse_event(body: &[u8]) -> Result<StripeEvent, WebhookResult> {
    let event: StripeWebhookEvent = serde_json::from_slice(body).map_err(|e| {
        tracing::error!("Failed to parse Stripe webhook: {}", e);
        (StatusCode::BAD_REQUEST, "Invalid JSON")
    })?;

    fn object<T: serde::de::DeserializeOwned>(
        event: &StripeWebhookEvent,
        what: &'static str,
    ) -> Result<T, WebhookResult> {
        serde_json::from_value(event.data.object.clone()).map_err(|e| {
            tracing::error!("Failed to parse {}: {}", what, e);
            (StatusCode::BAD_REQUEST, "Invalid event object")
        })
    }

    match event.event_type.as_str() {
        "checkout.session.completed" => {
            Ok(StripeEvent::CheckoutCompleted(object(&event, "checkout session")?))
        }
        "invoice.paid" => Ok(StripeEvent::InvoicePaid(object(&event, "invoice")?)),
        "invoice.payment_failed" => {
            Ok(StripeEvent::InvoicePaymentFailed(object(&event, "invoice")?))
        }
        "invoice.upcoming" => Ok(StripeEvent::InvoiceUpcoming(object(&event, "invoice")?)),
        "customer.subscription.updated" => {
            Ok(StripeEvent::SubscriptionUpdated(object(&event, "subscription")?))
        }
        "customer.subscription.deleted" => {
            Ok(StripeEvent::SubscriptionDeleted(object(&event, "subscription")?))
        }
        _ => Ok(StripeEvent::Ignored),
    }
}

/// Resolve the local customer a subscription event belongs to: by stored
/// subscription id first, then by the metadata the checkout stamped on the
/// subscription. A metadata hit also backlinks the subscription id.
fn resolve_subscription_customer(
    conn: &Connection,
    subscription: &StripeSubscription,
) -> Result<Option<Customer>, WebhookResult> {
    if let Some(customer) = queries::get_customer_by_subscription_id(conn, &subscription.id)
        .map_err(db_err)?
    {
        return Ok(Some(customer));
    }

    let Some(customer_id) = subscription.metadata.motorpact_customer_id.as_deref() else {
        return Ok(None);
    };
    let Some(customer) = queries::get_customer_by_id(conn, customer_id).map_err(db_err)? else {
        return Ok(None);
    };
    queries::link_customer_subscription(conn, &customer.id, &subscription.id).map_err(db_err)?;
    Ok(Some(customer))
}

fn db_err(e: crate::error::AppError) -> WebhookResult {
    tracing::error!("Webhook database error: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
}

fn record_audit(
    audit_conn: &Connection,
    enabled: bool,
    customer_id: &str,
    action: AuditAction,
    details: serde_json::Value,
) {
    if let Err(e) = queries::create_audit_log(
        audit_conn,
        enabled,
        Some(customer_id),
        None,
        action,
        Some(&details.to_string()),
        None,
    ) {
        tracing::warn!("Failed to write audit log for {}: {}", customer_id, e);
    }
}

/// checkout.session.completed: either the initial deposit+subscription
/// checkout (activates the account) or a balance top up.
pub fn apply_checkout_completed(
    conn: &Connection,
    audit_conn: &Connection,
    audit_enabled: bool,
    session: &StripeCheckoutSession,
) -> Result<WebhookResult, WebhookResult> {
    // Subscription-mode checkouts may arrive with empty session metadata; the
    // subscription the session references can still identify the customer.
    let customer = match session.metadata.motorpact_customer_id.as_deref() {
        Some(customer_id) => {
            let Some(customer) = queries::get_customer_by_id(conn, customer_id).map_err(db_err)?
            else {
                tracing::warn!("Checkout completed for unknown customer {}", customer_id);
                return Ok((StatusCode::OK, "Unknown customer"));
            };
            customer
        }
        None => {
            let Some(customer) = session
                .subscription
                .as_deref()
                .map(|sub_id| queries::get_customer_by_subscription_id(conn, sub_id))
                .transpose()
                .map_err(db_err)?
                .flatten()
            else {
                return Ok((StatusCode::OK, "No customer reference"));
            };
            customer
        }
    };

    if session.metadata.topup.as_deref() == Some("true") {
        return apply_topup_completed(conn, audit_conn, audit_enabled, &customer, session);
    }

    if session.payment_status.as_deref() != Some("paid") {
        return Ok((StatusCode::OK, "Checkout not paid"));
    }

    // The deposit amount the session was created with, falling back to the
    // locally computed requirement when metadata is absent.
    let deposit_cents = session
        .metadata
        .security_deposit
        .as_deref()
        .and_then(parse_major_units)
        .unwrap_or(customer.security_deposit_required_cents);

    queries::create_payment(
        conn,
        &CreatePayment {
            customer_id: customer.id.clone(),
            payment_type: PaymentType::SecurityDeposit,
            status: PaymentStatus::Succeeded,
            amount_cents: deposit_cents,
            currency: session.currency.clone().unwrap_or_else(|| "usd".into()),
            stripe_payment_intent_id: None,
            stripe_invoice_id: None,
            description: Some("Security deposit".into()),
        },
    )
    .map_err(db_err)?;

    queries::activate_customer(
        conn,
        &customer.id,
        deposit_cents,
        session.subscription.as_deref(),
    )
    .map_err(db_err)?;

    record_audit(
        audit_conn,
        audit_enabled,
        &customer.id,
        AuditAction::AccountActivated,
        serde_json::json!({
            "checkout_session": session.id,
            "deposit_cents": deposit_cents,
        }),
    );

    tracing::info!(
        "Activated customer {} (deposit {} cents)",
        customer.id,
        deposit_cents
    );
    Ok(ACK)
}

fn apply_topup_completed(
    conn: &Connection,
    audit_conn: &Connection,
    audit_enabled: bool,
    customer: &Customer,
    session: &StripeCheckoutSession,
) -> Result<WebhookResult, WebhookResult> {
    if session.payment_status.as_deref() != Some("paid") {
        return Ok((StatusCode::OK, "Topup not paid"));
    }
    let Some(amount_cents) = session.amount_total else {
        return Ok((StatusCode::OK, "Topup missing amount"));
    };

    queries::create_payment(
        conn,
        &CreatePayment {
            customer_id: customer.id.clone(),
            payment_type: PaymentType::DepositTopup,
            status: PaymentStatus::Succeeded,
            amount_cents,
            currency: session.currency.clone().unwrap_or_else(|| "usd".into()),
            stripe_payment_intent_id: None,
            stripe_invoice_id: None,
            description: Some("Account balance top up".into()),
        },
    )
    .map_err(db_err)?;

    queries::credit_account_balance(conn, &customer.id, amount_cents).map_err(db_err)?;

    record_audit(
        audit_conn,
        audit_enabled,
        &customer.id,
        AuditAction::PaymentRecorded,
        serde_json::json!({
            "checkout_session": session.id,
            "topup_cents": amount_cents,
        }),
    );

    Ok(ACK)
}

/// invoice.paid: mirror the invoice locally, record the subscription payment,
/// and refresh the billing period.
pub fn apply_invoice_paid(
    conn: &Connection,
    audit_conn: &Connection,
    audit_enabled: bool,
    invoice: &StripeInvoice,
) -> Result<WebhookResult, WebhookResult> {
    let Some(customer) = resolve_invoice_customer(conn, invoice)? else {
        tracing::warn!("invoice.paid with no resolvable customer: {}", invoice.id);
        return Ok((StatusCode::OK, "Unknown customer"));
    };

    let amount_paid = invoice.amount_paid.unwrap_or(0);

    queries::create_invoice(
        conn,
        &CreateInvoice {
            customer_id: customer.id.clone(),
            stripe_invoice_id: invoice.id.clone(),
            status: InvoiceStatus::Paid,
            amount_due_cents: invoice.amount_due.unwrap_or(amount_paid),
            amount_paid_cents: amount_paid,
            currency: invoice.currency.clone().unwrap_or_else(|| "usd".into()),
            hosted_invoice_url: invoice.hosted_invoice_url.clone(),
            invoice_pdf_url: invoice.invoice_pdf.clone(),
            period_start: invoice.period_start,
            period_end: invoice.period_end,
            due_date: invoice.due_date,
        },
    )
    .map_err(db_err)?;

    // Trial-start invoices are zero-amount; mirror them but record no payment.
    if amount_paid > 0 {
        queries::create_payment(
            conn,
            &CreatePayment {
                customer_id: customer.id.clone(),
                payment_type: PaymentType::Subscription,
                status: PaymentStatus::Succeeded,
                amount_cents: amount_paid,
                currency: invoice.currency.clone().unwrap_or_else(|| "usd".into()),
                stripe_payment_intent_id: None,
                stripe_invoice_id: Some(invoice.id.clone()),
                description: Some("Subscription payment".into()),
            },
        )
        .map_err(db_err)?;
    }

    queries::update_customer_subscription(
        conn,
        &customer.id,
        SubscriptionStatus::Active,
        invoice.period_end,
        None,
    )
    .map_err(db_err)?;

    record_audit(
        audit_conn,
        audit_enabled,
        &customer.id,
        AuditAction::PaymentRecorded,
        serde_json::json!({
            "invoice": invoice.id,
            "amount_paid_cents": amount_paid,
        }),
    );

    Ok(ACK)
}

/// invoice.payment_failed: record the failure for visibility. The account
/// status is left alone; Stripe's dunning flow decides whether the
/// subscription ends, which arrives as its own event.
pub fn apply_invoice_payment_failed(
    conn: &Connection,
    audit_conn: &Connection,
    audit_enabled: bool,
    invoice: &StripeInvoice,
) -> Result<WebhookResult, WebhookResult> {
    let Some(customer) = resolve_invoice_customer(conn, invoice)? else {
        tracing::warn!(
            "invoice.payment_failed with no resolvable customer: {}",
            invoice.id
        );
        return Ok((StatusCode::OK, "Unknown customer"));
    };

    queries::create_payment(
        conn,
        &CreatePayment {
            customer_id: customer.id.clone(),
            payment_type: PaymentType::Subscription,
            status: PaymentStatus::Failed,
            amount_cents: invoice.amount_due.unwrap_or(0),
            currency: invoice.currency.clone().unwrap_or_else(|| "usd".into()),
            stripe_payment_intent_id: None,
            stripe_invoice_id: Some(invoice.id.clone()),
            description: Some("Subscription payment failed".into()),
        },
    )
    .map_err(db_err)?;

    record_audit(
        audit_conn,
        audit_enabled,
        &customer.id,
        AuditAction::PaymentFailed,
        serde_json::json!({
            "invoice": invoice.id,
            "amount_due_cents": invoice.amount_due.unwrap_or(0),
        }),
    );

    Ok(ACK)
}

/// invoice.upcoming: record a renewal reminder in the audit trail. This is the
/// hook for a future notification feature; nothing is sent from here.
pub fn apply_invoice_upcoming(
    conn: &Connection,
    audit_conn: &Connection,
    audit_enabled: bool,
    invoice: &StripeInvoice,
) -> Result<WebhookResult, WebhookResult> {
    let Some(customer) = resolve_invoice_customer(conn, invoice)? else {
        tracing::warn!("invoice.upcoming with no resolvable customer: {}", invoice.id);
        return Ok((StatusCode::OK, "Unknown customer"));
    };

    record_audit(
        audit_conn,
        audit_enabled,
        &customer.id,
        AuditAction::RenewalReminder,
        serde_json::json!({
            "invoice": invoice.id,
            "amount_due_cents": invoice.amount_due.unwrap_or(0),
            "due_date": invoice.due_date,
        }),
    );

    Ok(ACK)
}

fn resolve_invoice_customer(
    conn: &Connection,
    invoice: &StripeInvoice,
) -> Result<Option<Customer>, WebhookResult> {
    if let Some(subscription_id) = invoice.subscription.as_deref() {
        if let Some(customer) =
            queries::get_customer_by_subscription_id(conn, subscription_id).map_err(db_err)?
        {
            return Ok(Some(customer));
        }
    }
    if let Some(stripe_customer) = invoice.customer.as_deref() {
        if let Some(customer) =
            queries::get_customer_by_stripe_customer_id(conn, stripe_customer).map_err(db_err)?
        {
            return Ok(Some(customer));
        }
    }
    Ok(None)
}

/// customer.subscription.updated: sync status and period end. When the local
/// record never saw checkout completion, the subscription metadata also lets
/// us backfill the paid deposit.
pub fn apply_subscription_updated(
    conn: &Connection,
    audit_conn: &Connection,
    audit_enabled: bool,
    subscription: &StripeSubscription,
) -> Result<WebhookResult, WebhookResult> {
    let Some(customer) = resolve_subscription_customer(conn, subscription)? else {
        tracing::warn!("subscription.updated for unknown subscription {}", subscription.id);
        return Ok((StatusCode::OK, "Unknown subscription"));
    };

    let Ok(status) = subscription.status.parse::<SubscriptionStatus>() else {
        tracing::warn!(
            "subscription {} has unrecognized status '{}'",
            subscription.id,
            subscription.status
        );
        return Ok((StatusCode::OK, "Unrecognized status"));
    };

    // A deposit the checkout event never delivered: take it from the
    // subscription metadata, but only while the recorded paid deposit is zero.
    let backfill_deposit = if customer.security_deposit_paid_cents == 0 {
        subscription
            .metadata
            .security_deposit
            .as_deref()
            .and_then(parse_major_units)
            .filter(|&cents| cents > 0)
    } else {
        None
    };

    queries::update_customer_subscription(
        conn,
        &customer.id,
        status,
        subscription.current_period_end,
        backfill_deposit,
    )
    .map_err(db_err)?;

    record_audit(
        audit_conn,
        audit_enabled,
        &customer.id,
        AuditAction::SubscriptionUpdated,
        serde_json::json!({
            "subscription": subscription.id,
            "status": subscription.status,
        }),
    );

    Ok(ACK)
}

/// customer.subscription.deleted: the financing arrangement is over, close
/// the account.
pub fn apply_subscription_deleted(
    conn: &Connection,
    audit_conn: &Connection,
    audit_enabled: bool,
    subscription: &StripeSubscription,
) -> Result<WebhookResult, WebhookResult> {
    let Some(customer) = resolve_subscription_customer(conn, subscription)? else {
        tracing::warn!("subscription.deleted for unknown subscription {}", subscription.id);
        return Ok((StatusCode::OK, "Unknown subscription"));
    };

    queries::close_customer(conn, &customer.id).map_err(db_err)?;

    record_audit(
        audit_conn,
        audit_enabled,
        &customer.id,
        AuditAction::SubscriptionCanceled,
        serde_json::json!({ "subscription": subscription.id }),
    );

    tracing::info!("Closed customer {} (subscription deleted)", customer.id);
    Ok(ACK)
}

/// Dispatch a parsed event against the database.
pub fn apply_event(
    conn: &Connection,
    audit_conn: &Connection,
    audit_enabled: bool,
    event: &StripeEvent,
) -> Result<WebhookResult, WebhookResult> {
    match event {
        StripeEvent::CheckoutCompleted(session) => {
            apply_checkout_completed(conn, audit_conn, audit_enabled, session)
        }
        StripeEvent::InvoicePaid(invoice) => {
            apply_invoice_paid(conn, audit_conn, audit_enabled, invoice)
        }
        StripeEvent::InvoicePaymentFailed(invoice) => {
            apply_invoice_payment_failed(conn, audit_conn, audit_enabled, invoice)
        }
        StripeEvent::InvoiceUpcoming(invoice) => {
            apply_invoice_upcoming(conn, audit_conn, audit_enabled, invoice)
        }
        StripeEvent::SubscriptionUpdated(subscription) => {
            apply_subscription_updated(conn, audit_conn, audit_enabled, subscription)
        }
        StripeEvent::SubscriptionDeleted(subscription) => {
            apply_subscription_deleted(conn, audit_conn, audit_enabled, subscription)
        }
        StripeEvent::Ignored => Ok((StatusCode::OK, "Ignored")),
    }
}

/// Acknowledgement body returned to Stripe. Successful deliveries get
/// `{"received": true}` plus the reason; rejections carry the reason alone.
fn respond((status, reason): WebhookResult) -> axum::response::Response {
    let body = if status.is_success() {
        serde_json::json!({ "received": true, "reason": reason })
    } else {
        serde_json::json!({ "error": reason })
    };
    (status, axum::Json(body)).into_response()
}

/// Axum handler for Stripe webhooks.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let signature = match headers.get("stripe-signature") {
        Some(value) => match value.to_str() {
            Ok(s) => s.to_string(),
            Err(_) => {
                return respond((StatusCode::BAD_REQUEST, "Invalid signature header"));
            }
        },
        None => return respond((StatusCode::BAD_REQUEST, "Missing stripe-signature header")),
    };

    match state.stripe.verify_webhook_signature(&body, &signature) {
        Ok(true) => {}
        Ok(false) => return respond((StatusCode::BAD_REQUEST, "Invalid signature")),
        Err(e) => {
            tracing::error!("Signature verification error: {}", e);
            return respond((StatusCode::BAD_REQUEST, "Invalid signature"));
        }
    }

    let mut event = match parse_event(&body) {
        Ok(event) => event,
        Err(result) => return respond(result),
    };

    let conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Webhook: failed to get DB connection: {}", e);
            return respond((StatusCode::INTERNAL_SERVER_ERROR, "Database unavailable"));
        }
    };

    // An event that resolves neither by stored subscription id nor by payload
    // metadata may still be traceable: fetch the subscription from the API,
    // whose metadata was stamped at checkout.
    match event {
        StripeEvent::SubscriptionUpdated(ref mut sub)
        | StripeEvent::SubscriptionDeleted(ref mut sub) => {
            let known = matches!(
                queries::get_customer_by_subscription_id(&conn, &sub.id),
                Ok(Some(_))
            );
            if !known && sub.metadata.motorpact_customer_id.is_none() {
                match state.stripe.get_subscription(&sub.id).await {
                    Ok(fetched) => sub.metadata = fetched.metadata,
                    Err(e) => {
                        tracing::warn!("Failed to fetch subscription {}: {}", sub.id, e);
                    }
                }
            }
        }
        // Subscription-mode checkout with empty session metadata: the deposit
        // and customer id live on the subscription instead.
        StripeEvent::CheckoutCompleted(ref mut session)
            if session.metadata.motorpact_customer_id.is_none() =>
        {
            if let Some(sub_id) = session.subscription.clone() {
                let known = matches!(
                    queries::get_customer_by_subscription_id(&conn, &sub_id),
                    Ok(Some(_))
                );
                if !known {
                    match state.stripe.get_subscription(&sub_id).await {
                        Ok(fetched) => session.metadata = fetched.metadata,
                        Err(e) => {
                            tracing::warn!("Failed to fetch subscription {}: {}", sub_id, e);
                        }
                    }
                }
            }
        }
        _ => {}
    }
    let audit_conn = match state.audit.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Webhook: failed to get audit DB connection: {}", e);
            return respond((StatusCode::INTERNAL_SERVER_ERROR, "Database unavailable"));
        }
    };

    match apply_event(&conn, &audit_conn, state.audit_log_enabled, &event) {
        Ok(result) | Err(result) => respond(result),
    }
}

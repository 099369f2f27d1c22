//! Customer portal: registration, account overview, documents, billing
//! history.

use axum::{
    extract::{Extension, Multipart, State},
    http::HeaderMap,
    middleware,
    routing::{get, post},
    Router,
};
use serde::Serialize;

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::Json;
use crate::middleware::{session_auth, AuthContext};
use crate::models::{
    missing_documents, AuditAction, CreateCustomer, Customer, Document, DocumentType, Invoice,
    Payment,
};
use crate::util::AuditLogBuilder;

const HISTORY_LIMIT: i64 = 50;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/me", get(get_account))
        .route("/me/register", post(register))
        .route("/me/payments", get(list_payments))
        .route("/me/invoices", get(list_invoices))
        .route("/me/documents", get(list_documents))
        .route("/me/documents/upload", post(upload_document))
        .layer(middleware::from_fn_with_state(state.clone(), session_auth))
        .with_state(state)
}

/// Register the authenticated user as a customer. One customer per user;
/// the security deposit requirement is computed here and fixed until
/// checkout.
async fn register(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Json(request): Json<CreateCustomer>,
) -> Result<Json<Customer>> {
    request.validate()?;

    let conn = state.db.get()?;
    if queries::get_customer_by_user_id(&conn, &ctx.user.id)?.is_some() {
        return Err(AppError::Conflict(msg::CUSTOMER_ALREADY_REGISTERED.into()));
    }

    let customer = queries::create_customer(&conn, &ctx.user, &request)?;

    // Create the Stripe-side customer up front so checkout can attach to it.
    // If Stripe is down the registration still stands; checkout retries the
    // creation.
    match state.stripe.create_customer(&customer.email, &customer.id).await {
        Ok(stripe_customer_id) => {
            queries::update_customer_stripe_id(&conn, &customer.id, &stripe_customer_id)?;
        }
        Err(e) => {
            tracing::warn!("Stripe customer creation failed for {}: {}", customer.id, e);
        }
    }

    let audit_conn = state.audit.get()?;
    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .customer(&customer.id)
        .user(&ctx.user.id)
        .action(AuditAction::CustomerRegistered)
        .details(&serde_json::json!({
            "account_type": customer.account_type,
            "purchase_value_cents": customer.purchase_value_cents,
            "security_deposit_required_cents": customer.security_deposit_required_cents,
        }))
        .save()?;

    let customer = queries::get_customer_by_id(&conn, &customer.id)?
        .or_not_found(msg::CUSTOMER_NOT_FOUND)?;
    Ok(Json(customer))
}

#[derive(Debug, Serialize)]
struct AccountResponse {
    customer: Customer,
    deposit_progress_percent: i64,
    missing_documents: Vec<DocumentType>,
}

async fn get_account(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<AccountResponse>> {
    let conn = state.db.get()?;
    let customer = queries::get_customer_by_user_id(&conn, &ctx.user.id)?
        .or_not_found(msg::CUSTOMER_NOT_FOUND)?;

    let documents = queries::get_documents_by_customer(&conn, &customer.id)?;
    let missing = missing_documents(customer.account_type, &documents);

    Ok(Json(AccountResponse {
        deposit_progress_percent: customer.deposit_progress_percent(),
        missing_documents: missing,
        customer,
    }))
}

async fn list_payments(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<Payment>>> {
    let conn = state.db.get()?;
    let customer = queries::get_customer_by_user_id(&conn, &ctx.user.id)?
        .or_not_found(msg::CUSTOMER_NOT_FOUND)?;
    let payments = queries::get_payments_by_customer(&conn, &customer.id, HISTORY_LIMIT)?;
    Ok(Json(payments))
}

async fn list_invoices(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<Invoice>>> {
    let conn = state.db.get()?;
    let customer = queries::get_customer_by_user_id(&conn, &ctx.user.id)?
        .or_not_found(msg::CUSTOMER_NOT_FOUND)?;
    let invoices = queries::get_invoices_by_customer(&conn, &customer.id, HISTORY_LIMIT)?;
    Ok(Json(invoices))
}

async fn list_documents(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<Document>>> {
    let conn = state.db.get()?;
    let customer = queries::get_customer_by_user_id(&conn, &ctx.user.id)?
        .or_not_found(msg::CUSTOMER_NOT_FOUND)?;
    let documents = queries::get_documents_by_customer(&conn, &customer.id)?;
    Ok(Json(documents))
}

/// Multipart upload: a `document_type` field plus a `file` field.
async fn upload_document(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Document>> {
    let conn = state.db.get()?;
    let customer = queries::get_customer_by_user_id(&conn, &ctx.user.id)?
        .or_not_found(msg::CUSTOMER_NOT_FOUND)?;

    let mut document_type: Option<DocumentType> = None;
    let mut file_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("document_type") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?;
                document_type = Some(
                    value
                        .parse()
                        .map_err(|_| AppError::BadRequest(msg::INVALID_DOCUMENT_TYPE.into()))?,
                );
            }
            Some("file") => {
                file_name = field.file_name().map(str::to_string);
                content_type = field.content_type().map(str::to_string);
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| {
                            AppError::BadRequest(format!("Invalid multipart body: {}", e))
                        })?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let document_type =
        document_type.ok_or_else(|| AppError::BadRequest(msg::INVALID_DOCUMENT_TYPE.into()))?;
    let bytes = bytes.ok_or_else(|| AppError::BadRequest(msg::MISSING_DOCUMENT_FILE.into()))?;
    let file_name = file_name.unwrap_or_else(|| "upload".to_string());

    let relative_path = state
        .documents
        .save(&customer.id, document_type, &file_name, &bytes)
        .await?;

    let document = queries::create_document(
        &conn,
        &customer.id,
        document_type,
        &file_name,
        &relative_path,
        bytes.len() as i64,
        content_type.as_deref(),
    )?;

    let audit_conn = state.audit.get()?;
    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .customer(&customer.id)
        .user(&ctx.user.id)
        .action(AuditAction::DocumentUploaded)
        .details(&serde_json::json!({
            "document_type": document_type,
            "file_name": file_name,
            "file_size": bytes.len(),
        }))
        .save()?;

    Ok(Json(document))
}

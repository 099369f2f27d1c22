//! Sign-up, login, logout, and session introspection.

use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;

use crate::auth::{
    generate_session_token, hash_password, hash_token, verify_password, SESSION_COOKIE,
    SESSION_TTL_SECS,
};
use crate::db::{queries, AppState};
use crate::error::{msg, AppError, Result};
use crate::extractors::Json;
use crate::models::{AuditAction, CreateUser, User};
use crate::util::AuditLogBuilder;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/session", get(session))
        .with_state(state)
}

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

async fn sign_up(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(request): Json<CreateUser>,
) -> Result<(CookieJar, Json<User>)> {
    request.validate()?;

    let conn = state.db.get()?;
    if queries::get_user_by_email(&conn, &request.email)?.is_some() {
        return Err(AppError::Conflict(msg::EMAIL_TAKEN.into()));
    }

    let password_hash = hash_password(&request.password)?;
    let user = queries::create_user(&conn, &request.email, &password_hash, false)?;

    let token = generate_session_token();
    queries::create_session(&conn, &user.id, &hash_token(&token), SESSION_TTL_SECS)?;

    let audit_conn = state.audit.get()?;
    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .user(&user.id)
        .action(AuditAction::SignUp)
        .details(&serde_json::json!({ "email": user.email }))
        .save()?;

    Ok((jar.add(session_cookie(token)), Json(user)))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<User>)> {
    let conn = state.db.get()?;

    // Same error for unknown email and bad password, no account probing.
    let user = queries::get_user_by_email(&conn, &request.email)?
        .ok_or_else(|| AppError::Unauthorized(msg::INVALID_CREDENTIALS.into()))?;
    if !verify_password(&request.password, &user.password_hash) {
        return Err(AppError::Unauthorized(msg::INVALID_CREDENTIALS.into()));
    }

    let token = generate_session_token();
    queries::create_session(&conn, &user.id, &hash_token(&token), SESSION_TTL_SECS)?;

    let audit_conn = state.audit.get()?;
    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .user(&user.id)
        .action(AuditAction::Login)
        .save()?;

    Ok((jar.add(session_cookie(token)), Json(user)))
}

async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<(CookieJar, Json<serde_json::Value>)> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let conn = state.db.get()?;
        let token_hash = hash_token(cookie.value());
        if let Some(user) = queries::get_user_by_session_token(&conn, &token_hash)? {
            let audit_conn = state.audit.get()?;
            AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
                .user(&user.id)
                .action(AuditAction::Logout)
                .save()?;
        }
        queries::delete_session(&conn, &token_hash)?;
    }

    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/").build());
    Ok((jar, Json(serde_json::json!({ "logged_out": true }))))
}

async fn session(State(state): State<AppState>, jar: CookieJar) -> Result<Json<User>> {
    let cookie = jar
        .get(SESSION_COOKIE)
        .ok_or_else(|| AppError::Unauthorized(msg::INVALID_CREDENTIALS.into()))?;

    let conn = state.db.get()?;
    queries::get_user_by_session_token(&conn, &hash_token(cookie.value()))?
        .map(Json)
        .ok_or_else(|| AppError::Unauthorized(msg::INVALID_CREDENTIALS.into()))
}

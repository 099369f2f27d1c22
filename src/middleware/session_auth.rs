use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use crate::auth::{hash_token, SESSION_COOKIE};
use crate::db::{queries, AppState};
use crate::models::User;

/// Authenticated request context, inserted as a request extension by
/// `session_auth` and read by handlers.
#[derive(Clone)]
pub struct AuthContext {
    pub user: User,
}

/// Middleware that resolves the session cookie to a user.
///
/// Rejects with 401 when the cookie is missing, unknown, or expired.
pub async fn session_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let user = queries::get_user_by_session_token(&conn, &hash_token(&token))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;
    drop(conn);

    request.extensions_mut().insert(AuthContext { user });
    Ok(next.run(request).await)
}

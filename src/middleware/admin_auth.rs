use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use crate::auth::{hash_token, SESSION_COOKIE};
use crate::db::{queries, AppState};

use super::AuthContext;

/// Middleware for the admin dashboard routes.
///
/// Same session resolution as `session_auth`, but additionally requires the
/// user's admin flag. Non-admins get 403 so they can tell a missing session
/// apart from missing privileges.
pub async fn admin_auth(
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

    if !user.is_admin {
        return Err(StatusCode::FORBIDDEN);
    }
    drop(conn);

    request.extensions_mut().insert(AuthContext { user });
    Ok(next.run(request).await)
}

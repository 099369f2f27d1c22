pub mod admin;
pub mod auth;
pub mod me;
pub mod stripe;
pub mod webhooks;

use axum::Router;

use crate::db::AppState;

/// Compose the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(auth::router(state.clone()))
        .merge(me::router(state.clone()))
        .merge(stripe::router(state.clone()))
        .merge(admin::router(state.clone()))
        .merge(webhooks::router(state))
}

mod stripe;

pub use stripe::*;

use axum::{routing::post, Router};

use crate::db::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/stripe", post(handle_stripe_webhook))
        .with_state(state)
}

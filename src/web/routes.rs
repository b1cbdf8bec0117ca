use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::app::AppState;

use super::handlers;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/mjpg", get(handlers::mjpg))
        .route("/full_res", get(handlers::full_res))
        .with_state(state)
}

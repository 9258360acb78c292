pub mod handlers;
pub mod models;

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/partners", get(handlers::partners))
        .route("/api/v1/products", get(handlers::products))
        .route("/api/v1/products/{code}/stock", get(handlers::stock))
        .route("/api/v1/operation-types", get(handlers::operation_types))
        .route("/api/v1/negotiation-types", get(handlers::negotiation_types))
        .route(
            "/api/v1/orders",
            get(handlers::orders).post(handlers::create_order),
        )
        .route("/api/v1/receivables", get(handlers::receivables))
        .with_state(state)
}

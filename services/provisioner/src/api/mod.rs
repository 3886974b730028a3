//! HTTP API handlers and routing.

pub mod error;
mod health;
mod rexec;

use axum::{
    http::{header, Method},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

pub use rexec::{api_url, resolve_caller, Caller, RexecPayload, RexecRequest, RexecResponse};

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(Any);

    Router::new()
        .merge(health::routes())
        .merge(rexec::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

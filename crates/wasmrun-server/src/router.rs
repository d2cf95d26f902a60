//! HTTP router configuration.
//!
//! This module provides functions to build the Axum router with all
//! necessary routes and middleware.

use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info_span;
use uuid::Uuid;

use crate::handler::{health_check, invoke, readiness_check};
use crate::state::AppState;

/// Build the application router.
///
/// Routes:
/// - `POST /invoke` - Run a module with a payload
/// - `GET /health` - Liveness check
/// - `GET /ready` - Readiness check with loader counters
///
/// Every request gets a span carrying a fresh request id.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let trace = TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
        info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %Uuid::new_v4(),
        )
    });

    Router::new()
        .route("/invoke", post(invoke))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(trace)
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

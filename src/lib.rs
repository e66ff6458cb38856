//! Library crate for party-matching-back, exposing modules for binaries and integration tests.

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
/// Persistence: record store backends and repositories.
pub mod dao;
/// Request, response and event payloads.
pub mod dto;
/// Error taxonomy and HTTP error mapping.
pub mod error;
/// HTTP and WebSocket routes.
pub mod routes;
/// Business logic behind the routes.
pub mod services;
/// Shared application state.
pub mod state;

/// Build the top-level router and attach cross-cutting middleware layers.
pub fn build_router(state: state::SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

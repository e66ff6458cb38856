use axum::{Router, middleware};

use crate::state::SharedState;

/// Bearer authentication middleware.
pub mod auth;
/// Swagger UI routes.
pub mod docs;
pub mod extract;
/// Party routes.
pub mod game;
/// Health check route.
pub mod health;
/// Teamspace routes.
pub mod team;
/// Observer WebSocket route.
pub mod websocket;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = team::router()
        .merge(game::router())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_identity,
        ));

    let public_router = health::router().merge(websocket::router());
    let docs_router = docs::router(state.clone());

    Router::new()
        .nest("/api", api_router)
        .merge(public_router)
        .merge(docs_router)
        .with_state(state)
}

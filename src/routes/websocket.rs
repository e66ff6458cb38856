use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade, ws::rejection::WebSocketUpgradeRejection},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::warn;

use crate::{
    dto::team::ObserverParams, error::AppError, services::websocket_service, state::SharedState,
};

#[utoipa::path(
    get,
    path = "/ws",
    tag = "observers",
    params(ObserverParams),
    responses(
        (status = 101, description = "Switching protocols to WebSocket"),
        (status = 400, description = "Missing teamspaceId or userId")
    )
)]
/// Upgrade the HTTP connection into a teamspace observer session.
pub async fn ws_handler(
    State(state): State<SharedState>,
    Query(params): Query<ObserverParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ObserverParams {
        teamspace_id,
        user_id,
    } = params;

    if teamspace_id.trim().is_empty() || user_id.trim().is_empty() {
        warn!("observer connection without teamspaceId or userId");
        return AppError::BadRequest("teamspaceId and userId are required".into()).into_response();
    }

    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| {
                websocket_service::handle_socket(state, socket, teamspace_id, user_id)
            })
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws", get(ws_handler))
}

use axum::{Extension, Json, Router, extract::State, routing::post};

use crate::{
    dto::team::{MembershipChangeResponse, StartGameResponse, TeamspaceRequest},
    error::{AppError, ErrorBody},
    routes::{auth::CallerIdentity, extract::ValidatedJson, team::teamspace_id},
    state::SharedState,
};

/// Party routes, mounted under `/api`.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/start_game", post(start_game))
        .route("/join_existing_party", post(join_existing_party))
}

/// Start the game of a teamspace organized by the caller.
#[utoipa::path(
    post,
    path = "/api/start_game",
    tag = "party",
    request_body = TeamspaceRequest,
    responses(
        (status = 200, description = "Party started", body = StartGameResponse),
        (status = 404, description = "Unknown teamspace", body = ErrorBody),
        (status = 409, description = "Caller is not the organizer", body = ErrorBody)
    )
)]
pub async fn start_game(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    ValidatedJson(payload): ValidatedJson<TeamspaceRequest>,
) -> Result<Json<StartGameResponse>, AppError> {
    caller.ensure_subject(&payload.user_id)?;
    let id = teamspace_id(payload.teamspace_uuid())?;
    let committed = state.lifecycle().await?.promote(&payload.user_id, id).await?;
    Ok(Json(committed.into()))
}

/// Join a teamspace whose party is already live.
#[utoipa::path(
    post,
    path = "/api/join_existing_party",
    tag = "party",
    request_body = TeamspaceRequest,
    responses(
        (status = 200, description = "Joined the live party", body = MembershipChangeResponse),
        (status = 404, description = "Unknown teamspace", body = ErrorBody),
        (status = 409, description = "Membership conflict or game not started", body = ErrorBody)
    )
)]
pub async fn join_existing_party(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    ValidatedJson(payload): ValidatedJson<TeamspaceRequest>,
) -> Result<Json<MembershipChangeResponse>, AppError> {
    caller.ensure_subject(&payload.user_id)?;
    let id = teamspace_id(payload.teamspace_uuid())?;
    let committed = state
        .lifecycle()
        .await?
        .join_live_party(&payload.user_id, id)
        .await?;
    Ok(Json(committed.into()))
}

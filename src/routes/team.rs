use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::team::{
        MembersQuery, MembersResponse, MembershipChangeResponse, OrganizeTeamRequest,
        OrganizeTeamResponse, TeamspaceRequest, UserStateQuery, UserStateResponse,
    },
    error::{AppError, ErrorBody},
    routes::{
        auth::CallerIdentity,
        extract::{ValidatedJson, ValidatedQuery},
    },
    state::SharedState,
};

/// Teamspace membership routes, mounted under `/api`.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/organize_team", post(organize_team))
        .route("/join_team", post(join_team))
        .route("/leave_team", post(leave_team))
        .route("/check_user_state", get(check_user_state))
        .route("/list_joining_party_users", get(list_joining_party_users))
}

pub(crate) fn teamspace_id(raw: Option<Uuid>) -> Result<Uuid, AppError> {
    raw.ok_or_else(|| AppError::BadRequest("teamspaceId must be a UUID".into()))
}

/// Create a teamspace organized by the caller.
#[utoipa::path(
    post,
    path = "/api/organize_team",
    tag = "team",
    request_body = OrganizeTeamRequest,
    responses(
        (status = 201, description = "Teamspace created", body = OrganizeTeamResponse),
        (status = 409, description = "Caller already belongs to a teamspace", body = ErrorBody)
    )
)]
pub async fn organize_team(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    ValidatedJson(payload): ValidatedJson<OrganizeTeamRequest>,
) -> Result<(StatusCode, Json<OrganizeTeamResponse>), AppError> {
    caller.ensure_subject(&payload.user_id)?;
    let teamspace_id = state.lifecycle().await?.create(&payload.user_id).await?;
    Ok((StatusCode::CREATED, Json(OrganizeTeamResponse { teamspace_id })))
}

/// Join a teamspace whose game has not started.
#[utoipa::path(
    post,
    path = "/api/join_team",
    tag = "team",
    request_body = TeamspaceRequest,
    responses(
        (status = 200, description = "Joined", body = MembershipChangeResponse),
        (status = 404, description = "Unknown teamspace", body = ErrorBody),
        (status = 409, description = "Membership conflict", body = ErrorBody)
    )
)]
pub async fn join_team(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    ValidatedJson(payload): ValidatedJson<TeamspaceRequest>,
) -> Result<Json<MembershipChangeResponse>, AppError> {
    caller.ensure_subject(&payload.user_id)?;
    let id = teamspace_id(payload.teamspace_uuid())?;
    let committed = state.lifecycle().await?.join(&payload.user_id, id).await?;
    Ok(Json(committed.into()))
}

/// Leave a teamspace; the organizer leaving dissolves it.
#[utoipa::path(
    post,
    path = "/api/leave_team",
    tag = "team",
    request_body = TeamspaceRequest,
    responses(
        (status = 200, description = "Left", body = MembershipChangeResponse),
        (status = 404, description = "Unknown teamspace", body = ErrorBody),
        (status = 409, description = "Caller is not a member", body = ErrorBody)
    )
)]
pub async fn leave_team(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    ValidatedJson(payload): ValidatedJson<TeamspaceRequest>,
) -> Result<Json<MembershipChangeResponse>, AppError> {
    caller.ensure_subject(&payload.user_id)?;
    let id = teamspace_id(payload.teamspace_uuid())?;
    let committed = state.lifecycle().await?.leave(&payload.user_id, id).await?;
    Ok(Json(committed.into()))
}

/// Report where the caller currently stands.
#[utoipa::path(
    get,
    path = "/api/check_user_state",
    tag = "team",
    params(UserStateQuery),
    responses((status = 200, description = "Current user state", body = UserStateResponse))
)]
pub async fn check_user_state(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    ValidatedQuery(query): ValidatedQuery<UserStateQuery>,
) -> Result<Json<UserStateResponse>, AppError> {
    caller.ensure_subject(&query.user_id)?;
    let user_state = state.user_states().await?.state_of(&query.user_id).await?;
    Ok(Json(user_state.into()))
}

/// List the members of a teamspace.
#[utoipa::path(
    get,
    path = "/api/list_joining_party_users",
    tag = "team",
    params(MembersQuery),
    responses(
        (status = 200, description = "Current members", body = MembersResponse),
        (status = 404, description = "Unknown teamspace", body = ErrorBody)
    )
)]
pub async fn list_joining_party_users(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    ValidatedQuery(query): ValidatedQuery<MembersQuery>,
) -> Result<Json<MembersResponse>, AppError> {
    caller.ensure_subject(&query.user_id)?;
    let id = teamspace_id(query.teamspace_uuid())?;
    let user_ids = state.lifecycle().await?.list_members(id).await?;
    Ok(Json(MembersResponse { user_ids }))
}

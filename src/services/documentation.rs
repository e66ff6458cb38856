use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for the party matching backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::team::organize_team,
        crate::routes::team::join_team,
        crate::routes::team::leave_team,
        crate::routes::team::check_user_state,
        crate::routes::team::list_joining_party_users,
        crate::routes::game::start_game,
        crate::routes::game::join_existing_party,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::team::OrganizeTeamRequest,
            crate::dto::team::OrganizeTeamResponse,
            crate::dto::team::TeamspaceRequest,
            crate::dto::team::MembershipChangeResponse,
            crate::dto::team::StartGameResponse,
            crate::dto::team::UserStateResponse,
            crate::dto::team::MembersResponse,
            crate::dto::ws::LobbyEvent,
            crate::error::ErrorBody,
            crate::error::ErrorCode,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "team", description = "Teamspace membership operations"),
        (name = "party", description = "Live party operations"),
        (name = "observers", description = "WebSocket link pushing lobby events"),
    )
)]
pub struct ApiDoc;

use serde::Serialize;
use utoipa::ToSchema;

/// Health payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Teamspaces with at least one connected observer.
    pub observed_teamspaces: usize,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(observed_teamspaces: usize) -> Self {
        Self {
            status: "ok".to_string(),
            observed_teamspaces,
        }
    }

    /// Create a health response indicating the record store is unavailable.
    pub fn degraded(observed_teamspaces: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            observed_teamspaces,
        }
    }
}

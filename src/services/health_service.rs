use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report store health along with the number of teamspaces currently observed.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_record_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "record store health check failed");
            }
        }
        Err(_) => warn!("record store unavailable (degraded mode)"),
    }

    let observed = state.registry().group_count().await;
    if state.is_degraded() {
        HealthResponse::degraded(observed)
    } else {
        HealthResponse::ok(observed)
    }
}

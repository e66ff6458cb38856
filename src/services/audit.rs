//! Structured audit trail of lifecycle operations, emitted under the `audit` tracing target.

use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ServiceError;

/// Record the outcome of one lifecycle operation.
pub fn record<T>(
    operation: &'static str,
    user_id: &str,
    teamspace_id: Option<Uuid>,
    outcome: &Result<T, ServiceError>,
) {
    let at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    let teamspace_id = teamspace_id.map(|id| id.to_string()).unwrap_or_default();

    match outcome {
        Ok(_) => info!(
            target: "audit",
            operation,
            user_id,
            teamspace_id = %teamspace_id,
            at = %at,
            result = "success",
            "lifecycle operation"
        ),
        Err(err) => warn!(
            target: "audit",
            operation,
            user_id,
            teamspace_id = %teamspace_id,
            at = %at,
            result = "failure",
            error_code = err.code().as_str(),
            error = %err,
            "lifecycle operation"
        ),
    }
}

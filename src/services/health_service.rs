use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Ping the session store and report whether the backend is degraded.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let open_instances = state.instance_count();
    match state.store().health_check().await {
        Ok(()) => HealthResponse::ok(open_instances),
        Err(err) => {
            warn!(error = %err, "session store health check failed");
            HealthResponse::degraded(open_instances, err.to_string())
        }
    }
}

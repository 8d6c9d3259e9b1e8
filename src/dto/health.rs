use serde::Serialize;
use utoipa::ToSchema;

/// Liveness report returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "ok" while the session store answers, "degraded" otherwise.
    pub status: &'static str,
    /// Teacher and student instances currently running.
    pub open_instances: usize,
    /// Store error message when degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthResponse {
    /// Store reachable.
    pub fn ok(open_instances: usize) -> Self {
        Self {
            status: "ok",
            open_instances,
            detail: None,
        }
    }

    /// Store failing its ping; instances keep their last known views.
    pub fn degraded(open_instances: usize, detail: impl Into<String>) -> Self {
        Self {
            status: "degraded",
            open_instances,
            detail: Some(detail.into()),
        }
    }
}

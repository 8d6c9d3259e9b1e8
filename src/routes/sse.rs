use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::{error::AppError, services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sse/{id}",
    tag = "sse",
    params(("id" = Uuid, Path, description = "Instance identifier")),
    responses(
        (status = 200, description = "View updates of one instance (`teacher.view` or `student.view`)", content_type = "text/event-stream", body = String),
        (status = 404, description = "Unknown instance")
    )
)]
/// Stream the view updates of one instance.
pub async fn instance_stream(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (receiver, handle) = sse_service::subscribe_instance(&state, id)?;
    info!(instance_id = %id, "new instance SSE connection");
    let greeting = sse_service::handshake_events(&state, &handle).await;
    Ok(sse_service::to_sse_stream(receiver, greeting, id))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/{id}", get(instance_stream))
}

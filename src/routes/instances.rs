use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::session::{InstanceRole, InstanceView, OpenInstanceResponse},
    error::AppError,
    services::instance_service,
    state::SharedState,
};

/// Open a teacher instance.
#[utoipa::path(
    post,
    path = "/instances/teacher",
    tag = "instances",
    responses((status = 201, description = "Teacher instance opened", body = OpenInstanceResponse))
)]
pub async fn open_teacher(
    State(state): State<SharedState>,
) -> (StatusCode, Json<OpenInstanceResponse>) {
    (
        StatusCode::CREATED,
        Json(instance_service::open_instance(&state, InstanceRole::Teacher)),
    )
}

/// Open a student instance.
#[utoipa::path(
    post,
    path = "/instances/student",
    tag = "instances",
    responses((status = 201, description = "Student instance opened", body = OpenInstanceResponse))
)]
pub async fn open_student(
    State(state): State<SharedState>,
) -> (StatusCode, Json<OpenInstanceResponse>) {
    (
        StatusCode::CREATED,
        Json(instance_service::open_instance(&state, InstanceRole::Student)),
    )
}

/// Fetch the latest view of any instance.
#[utoipa::path(
    get,
    path = "/instances/{id}",
    tag = "instances",
    params(("id" = Uuid, Path, description = "Instance identifier")),
    responses(
        (status = 200, description = "Current view", body = InstanceView),
        (status = 404, description = "Unknown instance")
    )
)]
pub async fn get_instance(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InstanceView>, AppError> {
    Ok(Json(instance_service::current_view(&state, id)?))
}

/// Close an instance, dropping its subscriptions and countdown.
#[utoipa::path(
    delete,
    path = "/instances/{id}",
    tag = "instances",
    params(("id" = Uuid, Path, description = "Instance identifier")),
    responses(
        (status = 204, description = "Instance closed"),
        (status = 404, description = "Unknown instance")
    )
)]
pub async fn close_instance(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    instance_service::close_instance(&state, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Instance lifecycle endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/instances/teacher", post(open_teacher))
        .route("/instances/student", post(open_student))
        .route("/instances/{id}", get(get_instance).delete(close_instance))
}

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::session::{JoinPollRequest, SelectOptionRequest, StudentView},
    error::AppError,
    services::student_service,
    state::SharedState,
};

/// Join a poll by code.
#[utoipa::path(
    post,
    path = "/student/{id}/join",
    tag = "student",
    params(("id" = Uuid, Path, description = "Student instance identifier")),
    request_body = JoinPollRequest,
    responses(
        (status = 200, description = "Joined", body = StudentView),
        (status = 400, description = "Empty code or name"),
        (status = 404, description = "Unknown code"),
        (status = 409, description = "Already joined")
    )
)]
pub async fn join_poll(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<JoinPollRequest>>,
) -> Result<Json<StudentView>, AppError> {
    Ok(Json(student_service::join_poll(&state, id, payload).await?))
}

/// Highlight an answer option.
#[utoipa::path(
    post,
    path = "/student/{id}/select",
    tag = "student",
    params(("id" = Uuid, Path, description = "Student instance identifier")),
    request_body = SelectOptionRequest,
    responses(
        (status = 200, description = "Option selected", body = StudentView),
        (status = 400, description = "Option out of range"),
        (status = 409, description = "No open question or already answered")
    )
)]
pub async fn select_option(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SelectOptionRequest>>,
) -> Result<Json<StudentView>, AppError> {
    Ok(Json(
        student_service::select_option(&state, id, payload.option_index).await?,
    ))
}

/// Submit the selected option.
#[utoipa::path(
    post,
    path = "/student/{id}/submit",
    tag = "student",
    params(("id" = Uuid, Path, description = "Student instance identifier")),
    responses(
        (status = 200, description = "Answer recorded", body = StudentView),
        (status = 400, description = "Nothing selected"),
        (status = 409, description = "Question closed or already answered")
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StudentView>, AppError> {
    Ok(Json(student_service::submit_answer(&state, id).await?))
}

/// Current student screen.
#[utoipa::path(
    get,
    path = "/student/{id}",
    operation_id = "get_student_view",
    tag = "student",
    params(("id" = Uuid, Path, description = "Student instance identifier")),
    responses((status = 200, description = "Student view", body = StudentView))
)]
pub async fn get_view(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StudentView>, AppError> {
    Ok(Json(student_service::view(&state, id)?))
}

/// Student intents.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/student/{id}", get(get_view))
        .route("/student/{id}/join", post(join_poll))
        .route("/student/{id}/select", post(select_option))
        .route("/student/{id}/submit", post(submit_answer))
}

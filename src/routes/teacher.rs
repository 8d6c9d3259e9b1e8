use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::session::{StartQuestionRequest, TeacherView},
    error::AppError,
    services::teacher_service,
    state::SharedState,
};

/// Create a poll with a fresh join code.
#[utoipa::path(
    post,
    path = "/teacher/{id}/poll",
    tag = "teacher",
    params(("id" = Uuid, Path, description = "Teacher instance identifier")),
    responses(
        (status = 200, description = "Poll created", body = TeacherView),
        (status = 409, description = "A poll already exists"),
        (status = 503, description = "Session store unavailable")
    )
)]
pub async fn create_poll(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TeacherView>, AppError> {
    Ok(Json(teacher_service::create_poll(&state, id).await?))
}

/// Start a timed question, closing the running one.
#[utoipa::path(
    post,
    path = "/teacher/{id}/questions",
    tag = "teacher",
    params(("id" = Uuid, Path, description = "Teacher instance identifier")),
    request_body = StartQuestionRequest,
    responses(
        (status = 200, description = "Question started", body = TeacherView),
        (status = 400, description = "Invalid question"),
        (status = 409, description = "No poll yet")
    )
)]
pub async fn start_question(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<StartQuestionRequest>>,
) -> Result<Json<TeacherView>, AppError> {
    Ok(Json(
        teacher_service::start_question(&state, id, payload).await?,
    ))
}

/// End the current question before its countdown runs out.
#[utoipa::path(
    post,
    path = "/teacher/{id}/questions/end",
    tag = "teacher",
    params(("id" = Uuid, Path, description = "Teacher instance identifier")),
    responses(
        (status = 200, description = "Question closed", body = TeacherView),
        (status = 409, description = "No question to end")
    )
)]
pub async fn end_question(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TeacherView>, AppError> {
    Ok(Json(teacher_service::end_question_early(&state, id).await?))
}

/// Current teacher screen.
#[utoipa::path(
    get,
    path = "/teacher/{id}",
    operation_id = "get_teacher_view",
    tag = "teacher",
    params(("id" = Uuid, Path, description = "Teacher instance identifier")),
    responses((status = 200, description = "Teacher view", body = TeacherView))
)]
pub async fn get_view(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TeacherView>, AppError> {
    Ok(Json(teacher_service::view(&state, id)?))
}

/// Teacher intents.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/teacher/{id}", get(get_view))
        .route("/teacher/{id}/poll", post(create_poll))
        .route("/teacher/{id}/questions", post(start_question))
        .route("/teacher/{id}/questions/end", post(end_question))
}

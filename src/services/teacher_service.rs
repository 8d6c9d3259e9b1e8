use uuid::Uuid;

use crate::{
    dto::session::{InstanceRole, InstanceView, StartQuestionRequest, TeacherView},
    error::ServiceError,
    services::instance::InstanceHandle,
    state::SharedState,
};

fn teacher(state: &SharedState, id: Uuid) -> Result<InstanceHandle, ServiceError> {
    let handle = state.instance(id)?;
    if handle.role() != InstanceRole::Teacher {
        return Err(ServiceError::NotFound(format!("teacher instance {id}")));
    }
    Ok(handle)
}

/// `create_poll` intent.
pub async fn create_poll(state: &SharedState, id: Uuid) -> Result<TeacherView, ServiceError> {
    teacher(state, id)?.create_poll().await
}

/// `start_question` intent.
pub async fn start_question(
    state: &SharedState,
    id: Uuid,
    request: StartQuestionRequest,
) -> Result<TeacherView, ServiceError> {
    teacher(state, id)?.start_question(request.into()).await
}

/// `end_question_early` intent.
pub async fn end_question_early(
    state: &SharedState,
    id: Uuid,
) -> Result<TeacherView, ServiceError> {
    teacher(state, id)?.end_question_early().await
}

/// Current teacher screen.
pub fn view(state: &SharedState, id: Uuid) -> Result<TeacherView, ServiceError> {
    match teacher(state, id)?.view() {
        InstanceView::Teacher(view) => Ok(view),
        InstanceView::Student(_) => Err(ServiceError::NotFound(format!("teacher instance {id}"))),
    }
}

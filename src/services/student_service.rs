use uuid::Uuid;

use crate::{
    dto::session::{InstanceRole, InstanceView, JoinPollRequest, StudentView},
    error::ServiceError,
    services::instance::InstanceHandle,
    state::SharedState,
};

fn student(state: &SharedState, id: Uuid) -> Result<InstanceHandle, ServiceError> {
    let handle = state.instance(id)?;
    if handle.role() != InstanceRole::Student {
        return Err(ServiceError::NotFound(format!("student instance {id}")));
    }
    Ok(handle)
}

/// `join_poll` intent.
pub async fn join_poll(
    state: &SharedState,
    id: Uuid,
    request: JoinPollRequest,
) -> Result<StudentView, ServiceError> {
    student(state, id)?
        .join_poll(request.code, request.name)
        .await
}

/// `select_option` intent.
pub async fn select_option(
    state: &SharedState,
    id: Uuid,
    index: usize,
) -> Result<StudentView, ServiceError> {
    student(state, id)?.select_option(index).await
}

/// `submit_answer` intent.
pub async fn submit_answer(state: &SharedState, id: Uuid) -> Result<StudentView, ServiceError> {
    student(state, id)?.submit_answer().await
}

/// Current student screen.
pub fn view(state: &SharedState, id: Uuid) -> Result<StudentView, ServiceError> {
    match student(state, id)?.view() {
        InstanceView::Student(view) => Ok(view),
        InstanceView::Teacher(_) => Err(ServiceError::NotFound(format!("student instance {id}"))),
    }
}

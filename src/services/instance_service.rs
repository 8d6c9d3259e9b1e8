use uuid::Uuid;

use crate::{
    dto::session::{InstanceRole, InstanceView, OpenInstanceResponse},
    error::ServiceError,
    state::SharedState,
};

/// Open a fresh teacher or student instance.
pub fn open_instance(state: &SharedState, role: InstanceRole) -> OpenInstanceResponse {
    let handle = state.open_instance(role);
    OpenInstanceResponse {
        instance_id: handle.id(),
        role,
    }
}

/// Close an instance, dropping its subscriptions and countdown.
pub async fn close_instance(state: &SharedState, id: Uuid) -> Result<(), ServiceError> {
    state.close_instance(id).await
}

/// Latest view of any instance.
pub fn current_view(state: &SharedState, id: Uuid) -> Result<InstanceView, ServiceError> {
    Ok(state.instance(id)?.view())
}

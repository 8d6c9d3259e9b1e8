use serde::Serialize;
use tracing::warn;

use crate::{
    dto::{session::InstanceView, sse::ServerEvent},
    state::SseHub,
};

const EVENT_TEACHER_VIEW: &str = "teacher.view";
const EVENT_STUDENT_VIEW: &str = "student.view";

/// Broadcast the given view to every SSE subscriber of an instance.
pub fn broadcast_view(hub: &SseHub, view: &InstanceView) {
    if let Some(event) = view_event(view) {
        hub.broadcast(event);
    }
}

/// Serialize a view into its role-specific SSE event.
pub fn view_event(view: &InstanceView) -> Option<ServerEvent> {
    match view {
        InstanceView::Teacher(view) => encode(EVENT_TEACHER_VIEW, view),
        InstanceView::Student(view) => encode(EVENT_STUDENT_VIEW, view),
    }
}

fn encode(event: &str, payload: &impl Serialize) -> Option<ServerEvent> {
    ServerEvent::json(Some(event.to_string()), payload)
        .inspect_err(|err| warn!(event, error = %err, "failed to serialize SSE payload"))
        .ok()
}

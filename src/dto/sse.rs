use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::session::InstanceRole;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE `event:` name.
    pub event: Option<String>,
    /// Serialized JSON body.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Instance the stream is bound to.
    pub instance_id: Uuid,
    /// Whether the instance drives a teacher or a student screen.
    pub role: InstanceRole,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the session store is currently unreachable.
    pub degraded: bool,
}

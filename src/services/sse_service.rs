use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::sse::{Handshake, ServerEvent},
    error::ServiceError,
    services::{instance::InstanceHandle, sse_events::view_event},
    state::SharedState,
};

const EVENT_HANDSHAKE: &str = "handshake";

/// Subscribe to the view stream of one instance.
pub fn subscribe_instance(
    state: &SharedState,
    id: Uuid,
) -> Result<(broadcast::Receiver<ServerEvent>, InstanceHandle), ServiceError> {
    let handle = state.instance(id)?;
    let receiver = handle.subscribe_events();
    debug!(
        instance_id = %id,
        subscribers = handle.hub().subscriber_count(),
        "SSE subscriber added"
    );
    Ok((receiver, handle))
}

/// Events greeting a freshly connected client: the handshake followed by the
/// current view, so it does not have to wait for the next change. They are
/// meant for that client only and never go through the instance hub.
pub async fn handshake_events(state: &SharedState, handle: &InstanceHandle) -> Vec<ServerEvent> {
    let handshake = Handshake {
        instance_id: handle.id(),
        role: handle.role(),
        message: "instance stream connected".into(),
        degraded: state.is_degraded().await,
    };

    let mut events = Vec::with_capacity(2);
    match ServerEvent::json(Some(EVENT_HANDSHAKE.to_string()), &handshake) {
        Ok(event) => events.push(event),
        Err(err) => warn!(error = %err, "failed to serialize SSE handshake"),
    }
    events.extend(view_event(&handle.view()));
    events
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}

/// Convert a broadcast receiver into an SSE response, sending `initial`
/// first, then forwarding hub events and cleaning up once the client
/// disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    initial: Vec<ServerEvent>,
    instance_id: Uuid,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        for payload in initial {
            if tx.send(Ok(to_event(payload))).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        // The instance was closed and its hub dropped.
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(instance_id = %instance_id, skipped, "SSE client lagging; skipping views");
                            continue;
                        }
                    }
                }
            }
        }

        info!(instance_id = %instance_id, "instance SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::{
        bus::ChangeBus, config::AppConfig, dao::session_store::MemorySessionStore,
        dto::session::InstanceRole, state::AppState,
    };

    #[tokio::test]
    async fn greeting_a_new_client_leaves_existing_ones_alone() {
        let bus = ChangeBus::new();
        let store = MemorySessionStore::new(bus.clone());
        let state = AppState::new(AppConfig::default(), Arc::new(store), bus);
        let handle = state.open_instance(InstanceRole::Student);

        let (mut first, _) = subscribe_instance(&state, handle.id()).unwrap();
        let (_second, handle) = subscribe_instance(&state, handle.id()).unwrap();
        let events = handshake_events(&state, &handle).await;

        let names: Vec<_> = events.iter().map(|e| e.event.as_deref()).collect();
        assert_eq!(names, [Some("handshake"), Some("student.view")]);
        assert!(events[0].data.contains("\"degraded\":false"));
        assert!(matches!(first.try_recv(), Err(TryRecvError::Empty)));
    }
}

use axum::Router;

use crate::state::SharedState;

/// Swagger UI.
pub mod docs;
/// Health check.
pub mod health;
/// Opening and closing instances.
pub mod instances;
/// View streams.
pub mod sse;
/// Student intents.
pub mod student;
/// Teacher intents.
pub mod teacher;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(instances::router())
        .merge(teacher::router())
        .merge(student::router())
        .merge(sse::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}

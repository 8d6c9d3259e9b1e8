//! Library crate for live-poll-back, exposing modules for binaries and integration tests.

pub mod bus;
pub mod config;
/// Entities, the session store and the repository over it.
pub mod dao;
/// Payloads exchanged with HTTP and SSE clients.
pub mod dto;
/// Error types and their HTTP mapping.
pub mod error;
/// Axum routers.
pub mod routes;
/// Session engines, instance actors and intent services.
pub mod services;
/// Shared application state, state machine and countdown.
pub mod state;

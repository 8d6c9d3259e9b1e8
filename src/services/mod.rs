/// Live tally of the responses to one question.
pub mod aggregator;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Per-screen actor tasks and their handles.
pub mod instance;
/// Opening, closing and inspecting instances.
pub mod instance_service;
/// Student join flow and answer submission.
pub mod join;
/// Teacher poll and question lifecycle.
pub mod lifecycle;
/// Join code generation and normalization.
pub mod session_code;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Student intents exposed over HTTP.
pub mod student_service;
/// Teacher intents exposed over HTTP.
pub mod teacher_service;

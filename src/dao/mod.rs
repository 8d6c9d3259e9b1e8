/// Database model definitions.
pub mod models;
/// Typed helpers over the session store.
pub mod repository;
/// Session store trait and its in-memory implementation.
pub mod session_store;
/// Storage abstraction layer for database operations.
pub mod storage;

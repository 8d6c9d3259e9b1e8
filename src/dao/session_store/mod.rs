/// In-process implementation.
pub mod memory;

use crate::dao::models::{Filter, Patch, Record, Table, UpdateOutcome};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

pub use memory::MemorySessionStore;

/// Abstraction over the persistence layer holding polls, questions,
/// participants and responses.
///
/// Implementations validate every record they accept, enforce the uniqueness
/// constraints of the data model and publish successful writes on the change
/// bus.
pub trait SessionStore: Send + Sync {
    /// Validate, check constraints and store a new row.
    fn insert(&self, record: Record) -> BoxFuture<'static, StorageResult<Record>>;
    /// First row of `table` matching `filter`.
    fn query_one(&self, table: Table, filter: Filter)
    -> BoxFuture<'static, StorageResult<Option<Record>>>;
    /// Every row of `table` matching `filter`, in insertion order.
    fn query_many(&self, table: Table, filter: Filter)
    -> BoxFuture<'static, StorageResult<Vec<Record>>>;
    /// Apply `patch` to the row `id` unless it already satisfies it.
    fn update(
        &self,
        table: Table,
        id: Uuid,
        patch: Patch,
    ) -> BoxFuture<'static, StorageResult<UpdateOutcome>>;
    /// Cheap liveness ping.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}

use std::error::Error;
use thiserror::Error;

use crate::dao::models::Table;

/// Primary key already taken.
pub const PRIMARY_KEY: &str = "primary_key";
/// Two active polls may not share a join code.
pub const ACTIVE_POLL_CODE: &str = "active_poll_code_unique";
/// A poll has at most one active question.
pub const ONE_ACTIVE_QUESTION: &str = "one_active_question_per_poll";
/// A participant answers a question once.
pub const ONE_RESPONSE_PER_PARTICIPANT: &str = "one_response_per_participant";
/// Responses are only accepted while their question is active.
pub const QUESTION_CLOSED: &str = "question_closed";

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// What failed.
        message: String,
        /// Underlying backend error, if any.
        #[source]
        source: Option<Box<dyn Error + Send + Sync>>,
    },
    /// A uniqueness constraint enforced by the store rejected the write.
    #[error("constraint `{constraint}` violated on table {table:?}")]
    Conflict {
        /// Table the write targeted.
        table: Table,
        /// Name of the violated constraint.
        constraint: &'static str,
    },
    /// The record failed validation at the store boundary.
    #[error("record rejected by table {table:?}: {reason}")]
    Rejected {
        /// Table the write targeted.
        table: Table,
        /// Why the record was refused.
        reason: String,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Some(Box::new(source)),
        }
    }

    /// Construct an unavailable error for a backend that is known to be offline.
    pub fn offline(message: impl Into<String>) -> Self {
        StorageError::Unavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Construct a rejection for a record that does not belong in `table`.
    pub fn rejected(table: Table, reason: impl Into<String>) -> Self {
        StorageError::Rejected {
            table,
            reason: reason.into(),
        }
    }
}

//! Engine error taxonomy.
//!
//! Five typed failures callers can act on, plus the infrastructure
//! variant for store failures. Nothing here is retried internally.

use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed input: bad time range, non-positive amount, empty item list.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A contention rule was violated: overlapping appointment, bed not
    /// available, insufficient stock.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Illegal {entity} transition: {from} -> {to}")]
    IllegalTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: &Uuid) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn illegal_transition(
        entity: &'static str,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::IllegalTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Only contention failures are worth retrying, and only with fresh state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::Sqlite(e))
    }
}

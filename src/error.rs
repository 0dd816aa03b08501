//! Error types for taxocat.
//!
//! All errors are strongly typed using thiserror. Codec malformations are
//! recovered where they occur; store failures surface as
//! [`ExecutionError::StoreUnavailable`] carrying how far the operation got.

use thiserror::Error;

use crate::dimension::Dimension;
use crate::driver::CodecError;
use crate::entity::{EntityId, EntityKind};
use crate::relationship::RelationshipId;
use crate::storage::StorageError;

/// Validation errors that occur during input validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Entity name cannot be empty")]
    EmptyEntityName,

    #[error("Invalid member key '{key}': {reason}")]
    InvalidMemberKey {
        key: String,
        reason: String,
    },

    #[error("Unknown dimension '{name}'")]
    UnknownDimension {
        name: String,
    },

    #[error("Dimension {dimension} is not a driver slot of {kind}")]
    DimensionNotApplicable {
        dimension: Dimension,
        kind: EntityKind,
    },

    #[error("{kind} selection has {actual} slots, expected at most {expected}")]
    SlotCountMismatch {
        kind: EntityKind,
        expected: usize,
        actual: usize,
    },

    #[error("Relationship endpoints must share a kind (source {source_kind}, target {target_kind})")]
    KindMismatch {
        source_kind: EntityKind,
        target_kind: EntityKind,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Execution errors that occur during operation execution.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Entity not found: {id}")]
    EntityNotFound {
        id: EntityId,
    },

    #[error("Relationship not found: {id}")]
    RelationshipNotFound {
        id: RelationshipId,
    },

    #[error("Store unavailable after {operations_completed} operations: {message}")]
    StoreUnavailable {
        message: String,
        operations_completed: usize,
    },

    #[error("Pass aborted after {consecutive_failures} consecutive pair failures ({operations_completed} operations completed)")]
    PassAborted {
        consecutive_failures: usize,
        operations_completed: usize,
    },
}

/// Top-level error type for taxocat.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl CatalogError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Map a store failure, recording how many store operations of the
    /// current unit of work had completed.
    #[must_use]
    pub fn from_storage(err: StorageError, operations_completed: usize) -> Self {
        match err {
            StorageError::EntityNotFound(id) => ExecutionError::EntityNotFound { id }.into(),
            StorageError::RelationshipNotFound(id) => {
                ExecutionError::RelationshipNotFound { id }.into()
            }
            other => ExecutionError::StoreUnavailable {
                message: other.to_string(),
                operations_completed,
            }
            .into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if re-running the operation from scratch may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Execution(
                ExecutionError::StoreUnavailable { .. } | ExecutionError::PassAborted { .. }
            )
        )
    }

    /// Store operations completed before a store failure, if this is one.
    #[must_use]
    pub const fn operations_completed(&self) -> Option<usize> {
        match self {
            Self::Execution(
                ExecutionError::StoreUnavailable { operations_completed, .. }
                | ExecutionError::PassAborted { operations_completed, .. },
            ) => Some(*operations_completed),
            _ => None,
        }
    }
}

/// Result type alias for taxocat operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

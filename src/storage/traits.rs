//! Abstract storage traits for taxocat.
//!
//! These traits define the contract a property-graph backend must
//! implement: dimension-member nodes keyed by `(dimension, key)`, entity
//! nodes keyed by id, member-to-entity relevance edges and
//! entity-to-entity relationships.
//!
//! Deletes are detach-deletes: removing a node removes every edge and
//! relationship touching it.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::dimension::Dimension;
use crate::entity::{Entity, EntityId, EntityKind};
use crate::relationship::{Relationship, RelationshipId};

/// Errors that can occur during storage operations.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Entity not found.
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// Relationship not found.
    #[error("Relationship not found: {0}")]
    RelationshipNotFound(RelationshipId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Read-only view of which members currently exist per dimension.
pub trait DimensionRegistry: Send + Sync {
    /// Current members of `dimension`, ordered.
    fn list_members(&self, dimension: Dimension) -> Result<BTreeSet<String>, StorageError>;

    /// Returns true if `key` currently exists in `dimension`.
    fn member_exists(&self, dimension: Dimension, key: &str) -> Result<bool, StorageError>;
}

/// Mutations of dimension-member nodes.
pub trait MemberStore: DimensionRegistry {
    /// Upsert a member node. Returns true if it was created.
    fn upsert_member(&self, dimension: Dimension, key: &str) -> Result<bool, StorageError>;

    /// Detach-delete a member node. Returns true if it existed.
    fn delete_member(&self, dimension: Dimension, key: &str) -> Result<bool, StorageError>;
}

/// Storage trait for entity nodes.
pub trait EntityStore: Send + Sync {
    /// Insert a new entity. Returns error if ID already exists.
    fn insert_entity(&self, entity: Entity) -> Result<(), StorageError>;

    /// Get an entity by ID.
    fn get_entity(&self, id: EntityId) -> Result<Option<Entity>, StorageError>;

    /// Update an existing entity. Returns error if not found.
    fn update_entity(&self, entity: Entity) -> Result<(), StorageError>;

    /// Rename an entity in place. Returns true if the name changed.
    fn set_name(&self, id: EntityId, name: &str) -> Result<bool, StorageError>;

    /// Replace only the driver encoding. Returns true if it changed.
    fn set_driver_encoding(&self, id: EntityId, encoding: &str) -> Result<bool, StorageError>;

    /// Replace only the cached relationship count. Returns true if it
    /// changed.
    fn set_relationship_count(&self, id: EntityId, count: u64) -> Result<bool, StorageError>;

    /// Detach-delete an entity with its edges and relationships.
    fn delete_entity(&self, id: EntityId) -> Result<(), StorageError>;

    /// All entities of `kind`, ordered by ID.
    fn list_entities(&self, kind: EntityKind) -> Result<Vec<Entity>, StorageError>;
}

/// Storage trait for member-to-entity relevance edges.
pub trait RelevanceStore: Send + Sync {
    /// Members of `dimension` currently linked to `entity`.
    fn relevance_edges(
        &self,
        entity: EntityId,
        dimension: Dimension,
    ) -> Result<BTreeSet<String>, StorageError>;

    /// Link every given member to `entity` in one operation.
    ///
    /// Existing edges and members without a node are skipped. Returns the
    /// number of edges created.
    fn link_members(
        &self,
        entity: EntityId,
        dimension: Dimension,
        members: &[String],
    ) -> Result<usize, StorageError>;

    /// Remove the edges from every given member to `entity` in one
    /// operation. Returns the number of edges removed.
    fn unlink_members(
        &self,
        entity: EntityId,
        dimension: Dimension,
        members: &[String],
    ) -> Result<usize, StorageError>;
}

/// Storage trait for entity-to-entity relationships.
pub trait RelationshipStore: Send + Sync {
    /// Insert a relationship. Both endpoints must exist.
    fn insert_relationship(&self, rel: Relationship) -> Result<(), StorageError>;

    /// Replace an existing relationship.
    fn update_relationship(&self, rel: Relationship) -> Result<(), StorageError>;

    /// Delete a relationship by ID.
    fn delete_relationship(&self, id: RelationshipId) -> Result<(), StorageError>;

    /// Every relationship from `source` to `target`.
    fn relationships_between(
        &self,
        source: EntityId,
        target: EntityId,
    ) -> Result<Vec<Relationship>, StorageError>;

    /// Every relationship owned by `source`.
    fn relationships_from(&self, source: EntityId) -> Result<Vec<Relationship>, StorageError>;

    /// Every relationship pointing at `target`.
    fn relationships_to(&self, target: EntityId) -> Result<Vec<Relationship>, StorageError>;
}

/// A complete property-graph backend.
pub trait GraphStore: MemberStore + EntityStore + RelevanceStore + RelationshipStore {
    /// View this store as its dimension registry.
    fn as_registry(&self) -> &dyn DimensionRegistry;
}

impl<T> GraphStore for T
where
    T: MemberStore + EntityStore + RelevanceStore + RelationshipStore,
{
    fn as_registry(&self) -> &dyn DimensionRegistry {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_registry_object_safe(_: &dyn DimensionRegistry) {}
    fn _assert_member_store_object_safe(_: &dyn MemberStore) {}
    fn _assert_entity_store_object_safe(_: &dyn EntityStore) {}
    fn _assert_relevance_store_object_safe(_: &dyn RelevanceStore) {}
    fn _assert_relationship_store_object_safe(_: &dyn RelationshipStore) {}
    fn _assert_graph_store_object_safe(_: &dyn GraphStore) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::EntityNotFound(EntityId::new());
        assert!(err.to_string().contains("Entity not found"));

        let err = StorageError::ConnectionError("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }
}

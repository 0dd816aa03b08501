//! Storage layer for taxocat.
//!
//! [`traits`] defines the abstract property-graph contract. Two backends
//! are provided: [`InMemoryGraphStore`] and, behind the `persistent`
//! feature, a write-ahead-logged store.

/// Implements every storage trait for a backend exposing
/// `read(context, |&GraphState| ..)` and `mutate(GraphMutation, context)`.
macro_rules! impl_graph_store {
    ($backend:ty) => {
        impl $crate::storage::DimensionRegistry for $backend {
            fn list_members(
                &self,
                dimension: $crate::dimension::Dimension,
            ) -> Result<std::collections::BTreeSet<String>, $crate::storage::StorageError> {
                self.read("member.list", |s| s.list_members(dimension))
            }

            fn member_exists(
                &self,
                dimension: $crate::dimension::Dimension,
                key: &str,
            ) -> Result<bool, $crate::storage::StorageError> {
                self.read("member.exists", |s| s.member_exists(dimension, key))
            }
        }

        impl $crate::storage::MemberStore for $backend {
            fn upsert_member(
                &self,
                dimension: $crate::dimension::Dimension,
                key: &str,
            ) -> Result<bool, $crate::storage::StorageError> {
                let m = $crate::storage::GraphMutation::UpsertMember {
                    dimension,
                    key: key.to_string(),
                };
                Ok(self.mutate(m, "member.upsert")? > 0)
            }

            fn delete_member(
                &self,
                dimension: $crate::dimension::Dimension,
                key: &str,
            ) -> Result<bool, $crate::storage::StorageError> {
                let m = $crate::storage::GraphMutation::DeleteMember {
                    dimension,
                    key: key.to_string(),
                };
                Ok(self.mutate(m, "member.delete")? > 0)
            }
        }

        impl $crate::storage::EntityStore for $backend {
            fn insert_entity(
                &self,
                entity: $crate::entity::Entity,
            ) -> Result<(), $crate::storage::StorageError> {
                let m = $crate::storage::GraphMutation::InsertEntity(entity);
                self.mutate(m, "entity.insert").map(|_| ())
            }

            fn get_entity(
                &self,
                id: $crate::entity::EntityId,
            ) -> Result<Option<$crate::entity::Entity>, $crate::storage::StorageError> {
                self.read("entity.get", |s| s.get_entity(id))
            }

            fn update_entity(
                &self,
                entity: $crate::entity::Entity,
            ) -> Result<(), $crate::storage::StorageError> {
                let m = $crate::storage::GraphMutation::UpdateEntity(entity);
                self.mutate(m, "entity.update").map(|_| ())
            }

            fn set_name(
                &self,
                id: $crate::entity::EntityId,
                name: &str,
            ) -> Result<bool, $crate::storage::StorageError> {
                let m = $crate::storage::GraphMutation::SetName {
                    id,
                    name: name.to_string(),
                    updated_at: ::chrono::Utc::now(),
                };
                Ok(self.mutate(m, "entity.set_name")? > 0)
            }

            fn set_driver_encoding(
                &self,
                id: $crate::entity::EntityId,
                encoding: &str,
            ) -> Result<bool, $crate::storage::StorageError> {
                let m = $crate::storage::GraphMutation::SetDriverEncoding {
                    id,
                    encoding: encoding.to_string(),
                    updated_at: ::chrono::Utc::now(),
                };
                Ok(self.mutate(m, "entity.set_driver_encoding")? > 0)
            }

            fn set_relationship_count(
                &self,
                id: $crate::entity::EntityId,
                count: u64,
            ) -> Result<bool, $crate::storage::StorageError> {
                let m = $crate::storage::GraphMutation::SetRelationshipCount { id, count };
                Ok(self.mutate(m, "entity.set_relationship_count")? > 0)
            }

            fn delete_entity(
                &self,
                id: $crate::entity::EntityId,
            ) -> Result<(), $crate::storage::StorageError> {
                let m = $crate::storage::GraphMutation::DeleteEntity { id };
                self.mutate(m, "entity.delete").map(|_| ())
            }

            fn list_entities(
                &self,
                kind: $crate::entity::EntityKind,
            ) -> Result<Vec<$crate::entity::Entity>, $crate::storage::StorageError> {
                self.read("entity.list", |s| s.list_entities(kind))
            }
        }

        impl $crate::storage::RelevanceStore for $backend {
            fn relevance_edges(
                &self,
                entity: $crate::entity::EntityId,
                dimension: $crate::dimension::Dimension,
            ) -> Result<std::collections::BTreeSet<String>, $crate::storage::StorageError> {
                self.read("relevance.edges", |s| s.relevance_edges(entity, dimension))
            }

            fn link_members(
                &self,
                entity: $crate::entity::EntityId,
                dimension: $crate::dimension::Dimension,
                members: &[String],
            ) -> Result<usize, $crate::storage::StorageError> {
                let m = $crate::storage::GraphMutation::LinkMembers {
                    entity,
                    dimension,
                    members: members.to_vec(),
                };
                self.mutate(m, "relevance.link")
            }

            fn unlink_members(
                &self,
                entity: $crate::entity::EntityId,
                dimension: $crate::dimension::Dimension,
                members: &[String],
            ) -> Result<usize, $crate::storage::StorageError> {
                let m = $crate::storage::GraphMutation::UnlinkMembers {
                    entity,
                    dimension,
                    members: members.to_vec(),
                };
                self.mutate(m, "relevance.unlink")
            }
        }

        impl $crate::storage::RelationshipStore for $backend {
            fn insert_relationship(
                &self,
                rel: $crate::relationship::Relationship,
            ) -> Result<(), $crate::storage::StorageError> {
                let m = $crate::storage::GraphMutation::InsertRelationship(rel);
                self.mutate(m, "relationship.insert").map(|_| ())
            }

            fn update_relationship(
                &self,
                rel: $crate::relationship::Relationship,
            ) -> Result<(), $crate::storage::StorageError> {
                let m = $crate::storage::GraphMutation::UpdateRelationship(rel);
                self.mutate(m, "relationship.update").map(|_| ())
            }

            fn delete_relationship(
                &self,
                id: $crate::relationship::RelationshipId,
            ) -> Result<(), $crate::storage::StorageError> {
                let m = $crate::storage::GraphMutation::DeleteRelationship { id };
                self.mutate(m, "relationship.delete").map(|_| ())
            }

            fn relationships_between(
                &self,
                source: $crate::entity::EntityId,
                target: $crate::entity::EntityId,
            ) -> Result<Vec<$crate::relationship::Relationship>, $crate::storage::StorageError> {
                self.read("relationship.between", |s| s.relationships_between(source, target))
            }

            fn relationships_from(
                &self,
                source: $crate::entity::EntityId,
            ) -> Result<Vec<$crate::relationship::Relationship>, $crate::storage::StorageError> {
                self.read("relationship.from", |s| s.relationships_from(source))
            }

            fn relationships_to(
                &self,
                target: $crate::entity::EntityId,
            ) -> Result<Vec<$crate::relationship::Relationship>, $crate::storage::StorageError> {
                self.read("relationship.to", |s| s.relationships_to(target))
            }
        }
    };
}

mod memory;
mod mutation;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryGraphStore;
pub use mutation::GraphMutation;
pub use traits::{
    DimensionRegistry, EntityStore, GraphStore, MemberStore, RelationshipStore, RelevanceStore,
    StorageError,
};

#[cfg(feature = "persistent")]
pub use persistent::{open_graph, PersistentConfig, PersistentGraphStore};

//! In-memory storage backend.
//!
//! This module provides a thread-safe in-memory implementation of the
//! storage traits. It is intended for embedded usage, tests, and as a
//! reference implementation.

use std::sync::RwLock;

use crate::storage::mutation::{GraphMutation, GraphState};
use crate::storage::traits::StorageError;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory property graph.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
}

impl InMemoryGraphStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn mutate(&self, mutation: GraphMutation, context: &'static str) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err(context))?;
        if !state.precheck(&mutation)? {
            return Ok(0);
        }
        Ok(state.apply(mutation))
    }

    fn read<T>(&self, context: &'static str, f: impl FnOnce(&GraphState) -> T) -> Result<T, StorageError> {
        let state = self.state.read().map_err(|_| lock_err(context))?;
        Ok(f(&state))
    }
}

impl_graph_store!(InMemoryGraphStore);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::Dimension;
    use crate::entity::{Entity, EntityKind};
    use crate::relationship::Relationship;
    use crate::storage::traits::{EntityStore, MemberStore, RelationshipStore, RelevanceStore};

    fn object(name: &str) -> Entity {
        Entity::new(EntityKind::Object, name, "*|*|*|*")
    }

    #[test]
    fn entity_insert_duplicate_and_missing_update() {
        let store = InMemoryGraphStore::new();
        let e = object("Customers");
        store.insert_entity(e.clone()).unwrap();
        assert!(matches!(store.insert_entity(e.clone()), Err(StorageError::DuplicateKey(_))));

        let ghost = object("Ghost");
        assert!(matches!(store.update_entity(ghost), Err(StorageError::EntityNotFound(_))));
        assert_eq!(store.list_entities(EntityKind::Object).unwrap().len(), 1);
        assert!(store.list_entities(EntityKind::Variable).unwrap().is_empty());
    }

    #[test]
    fn member_delete_detaches_relevance_edges() {
        let store = InMemoryGraphStore::new();
        let e = object("Customers");
        let id = e.id;
        store.insert_entity(e).unwrap();
        assert!(store.upsert_member(Dimension::Domain, "Finance").unwrap());
        assert!(!store.upsert_member(Dimension::Domain, "Finance").unwrap());
        store.upsert_member(Dimension::Domain, "Health").unwrap();

        let both = vec!["Finance".to_string(), "Health".to_string()];
        assert_eq!(store.link_members(id, Dimension::Domain, &both).unwrap(), 2);
        assert_eq!(store.link_members(id, Dimension::Domain, &both).unwrap(), 0);

        assert!(store.delete_member(Dimension::Domain, "Finance").unwrap());
        assert!(!store.delete_member(Dimension::Domain, "Finance").unwrap());
        let edges = store.relevance_edges(id, Dimension::Domain).unwrap();
        assert_eq!(edges.into_iter().collect::<Vec<_>>(), vec!["Health".to_string()]);

        // Re-creating the member does not resurrect the old edge.
        store.upsert_member(Dimension::Domain, "Finance").unwrap();
        assert_eq!(store.relevance_edges(id, Dimension::Domain).unwrap().len(), 1);
    }

    #[test]
    fn entity_delete_detaches_relationships_both_ways() {
        let store = InMemoryGraphStore::new();
        let a = object("A");
        let b = object("B");
        let (a_id, b_id) = (a.id, b.id);
        store.insert_entity(a.clone()).unwrap();
        store.insert_entity(b.clone()).unwrap();
        store
            .insert_relationship(Relationship::new(&a, &b, "A", "Critical", "Inter-Table"))
            .unwrap();
        store
            .insert_relationship(Relationship::new(&b, &a, "B", "Critical", "Inter-Table"))
            .unwrap();
        store
            .insert_relationship(Relationship::new(&a, &a, "A", "Critical", "Intra-Table"))
            .unwrap();

        store.delete_entity(b_id).unwrap();
        let from_a = store.relationships_from(a_id).unwrap();
        assert_eq!(from_a.len(), 1);
        assert_eq!(from_a[0].target, a_id);
        assert!(store.relationships_to(a_id).unwrap().iter().all(|r| r.source == a_id));
        assert!(matches!(store.delete_entity(b_id), Err(StorageError::EntityNotFound(_))));
    }

    #[test]
    fn relationship_requires_endpoints() {
        let store = InMemoryGraphStore::new();
        let a = object("A");
        let b = object("B");
        store.insert_entity(a.clone()).unwrap();
        let rel = Relationship::new(&a, &b, "A", "Critical", "Inter-Table");
        assert!(matches!(store.insert_relationship(rel.clone()), Err(StorageError::EntityNotFound(_))));
        assert!(matches!(
            store.delete_relationship(rel.id),
            Err(StorageError::RelationshipNotFound(_))
        ));
    }
}

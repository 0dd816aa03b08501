//! Graph mutations and the shared graph state they apply to.
//!
//! Every write to a backend is expressed as a [`GraphMutation`]. A
//! mutation is prechecked against the current [`GraphState`] (which also
//! tells whether it changes anything), then applied infallibly. The
//! persistent backend logs exactly the mutations that change state.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dimension::Dimension;
use crate::entity::{Entity, EntityId, EntityKind};
use crate::relationship::{Relationship, RelationshipId};
use crate::storage::traits::StorageError;

/// A single write against the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphMutation {
    UpsertMember {
        dimension: Dimension,
        key: String,
    },
    /// Detach-delete: the member's relevance edges go with it.
    DeleteMember {
        dimension: Dimension,
        key: String,
    },
    InsertEntity(Entity),
    /// Replace an entity's properties; the kind is immutable.
    UpdateEntity(Entity),
    /// Set one property, leaving concurrent writes to the others intact.
    SetName {
        id: EntityId,
        name: String,
        updated_at: DateTime<Utc>,
    },
    SetDriverEncoding {
        id: EntityId,
        encoding: String,
        updated_at: DateTime<Utc>,
    },
    SetRelationshipCount {
        id: EntityId,
        count: u64,
    },
    /// Detach-delete: edges and relationships in both directions go too.
    DeleteEntity {
        id: EntityId,
    },
    /// Members without a node are skipped.
    LinkMembers {
        entity: EntityId,
        dimension: Dimension,
        members: Vec<String>,
    },
    UnlinkMembers {
        entity: EntityId,
        dimension: Dimension,
        members: Vec<String>,
    },
    InsertRelationship(Relationship),
    UpdateRelationship(Relationship),
    DeleteRelationship {
        id: RelationshipId,
    },
}

/// In-memory property graph.
#[derive(Debug, Default, Clone)]
pub(crate) struct GraphState {
    members: BTreeMap<Dimension, BTreeSet<String>>,
    entities: BTreeMap<EntityId, Entity>,
    relevance: HashMap<EntityId, BTreeMap<Dimension, BTreeSet<String>>>,
    member_edges: HashMap<(Dimension, String), BTreeSet<EntityId>>,
    relationships: HashMap<RelationshipId, Relationship>,
    outbound: HashMap<EntityId, BTreeSet<RelationshipId>>,
    inbound: HashMap<EntityId, BTreeSet<RelationshipId>>,
}

impl GraphState {
    fn require_entity(&self, id: EntityId) -> Result<&Entity, StorageError> {
        self.entities.get(&id).ok_or(StorageError::EntityNotFound(id))
    }

    fn has_member(&self, dimension: Dimension, key: &str) -> bool {
        self.members.get(&dimension).is_some_and(|m| m.contains(key))
    }

    fn has_edge(&self, entity: EntityId, dimension: Dimension, key: &str) -> bool {
        self.relevance
            .get(&entity)
            .and_then(|dims| dims.get(&dimension))
            .is_some_and(|m| m.contains(key))
    }

    /// Validate `mutation` and report whether applying it changes state.
    pub(crate) fn precheck(&self, mutation: &GraphMutation) -> Result<bool, StorageError> {
        match mutation {
            GraphMutation::UpsertMember { dimension, key } => Ok(!self.has_member(*dimension, key)),
            GraphMutation::DeleteMember { dimension, key } => Ok(self.has_member(*dimension, key)),
            GraphMutation::InsertEntity(entity) => {
                if self.entities.contains_key(&entity.id) {
                    return Err(StorageError::DuplicateKey(format!("entity:{}", entity.id)));
                }
                Ok(true)
            }
            GraphMutation::UpdateEntity(entity) => {
                let existing = self.require_entity(entity.id)?;
                if existing.kind != entity.kind {
                    return Err(StorageError::BackendError(format!(
                        "entity {} cannot change kind from {} to {}",
                        entity.id, existing.kind, entity.kind
                    )));
                }
                Ok(true)
            }
            GraphMutation::SetName { id, name, .. } => Ok(self.require_entity(*id)?.name != *name),
            GraphMutation::SetDriverEncoding { id, encoding, .. } => {
                Ok(self.require_entity(*id)?.driver_encoding != *encoding)
            }
            GraphMutation::SetRelationshipCount { id, count } => {
                Ok(self.require_entity(*id)?.relationship_count != *count)
            }
            GraphMutation::DeleteEntity { id } => {
                self.require_entity(*id)?;
                Ok(true)
            }
            GraphMutation::LinkMembers {
                entity,
                dimension,
                members,
            } => {
                self.require_entity(*entity)?;
                Ok(members
                    .iter()
                    .any(|m| self.has_member(*dimension, m) && !self.has_edge(*entity, *dimension, m)))
            }
            GraphMutation::UnlinkMembers {
                entity,
                dimension,
                members,
            } => {
                self.require_entity(*entity)?;
                Ok(members.iter().any(|m| self.has_edge(*entity, *dimension, m)))
            }
            GraphMutation::InsertRelationship(rel) => {
                if self.relationships.contains_key(&rel.id) {
                    return Err(StorageError::DuplicateKey(format!("relationship:{}", rel.id)));
                }
                self.require_entity(rel.source)?;
                self.require_entity(rel.target)?;
                Ok(true)
            }
            GraphMutation::UpdateRelationship(rel) => {
                let existing = self
                    .relationships
                    .get(&rel.id)
                    .ok_or(StorageError::RelationshipNotFound(rel.id))?;
                if existing.source != rel.source || existing.target != rel.target {
                    return Err(StorageError::BackendError(format!(
                        "relationship {} cannot change endpoints",
                        rel.id
                    )));
                }
                Ok(existing != rel)
            }
            GraphMutation::DeleteRelationship { id } => {
                if !self.relationships.contains_key(id) {
                    return Err(StorageError::RelationshipNotFound(*id));
                }
                Ok(true)
            }
        }
    }

    /// Apply a mutation that passed [`GraphState::precheck`].
    ///
    /// Returns the number of nodes, edges or relationships affected.
    pub(crate) fn apply(&mut self, mutation: GraphMutation) -> usize {
        match mutation {
            GraphMutation::UpsertMember { dimension, key } => {
                usize::from(self.members.entry(dimension).or_default().insert(key))
            }
            GraphMutation::DeleteMember { dimension, key } => {
                let removed = self
                    .members
                    .get_mut(&dimension)
                    .is_some_and(|m| m.remove(&key));
                if let Some(linked) = self.member_edges.remove(&(dimension, key.clone())) {
                    for entity in linked {
                        if let Some(set) = self
                            .relevance
                            .get_mut(&entity)
                            .and_then(|dims| dims.get_mut(&dimension))
                        {
                            set.remove(&key);
                        }
                    }
                }
                usize::from(removed)
            }
            GraphMutation::InsertEntity(entity) | GraphMutation::UpdateEntity(entity) => {
                self.entities.insert(entity.id, entity);
                1
            }
            GraphMutation::SetName { id, name, updated_at } => {
                self.with_entity(id, |e| {
                    e.name = name;
                    e.updated_at = updated_at;
                })
            }
            GraphMutation::SetDriverEncoding {
                id,
                encoding,
                updated_at,
            } => self.with_entity(id, |e| {
                e.driver_encoding = encoding;
                e.updated_at = updated_at;
            }),
            GraphMutation::SetRelationshipCount { id, count } => {
                self.with_entity(id, |e| e.relationship_count = count)
            }
            GraphMutation::DeleteEntity { id } => self.detach_entity(id),
            GraphMutation::LinkMembers {
                entity,
                dimension,
                members,
            } => {
                let mut created = 0;
                for member in members {
                    if !self.has_member(dimension, &member) {
                        continue;
                    }
                    let set = self
                        .relevance
                        .entry(entity)
                        .or_default()
                        .entry(dimension)
                        .or_default();
                    if set.insert(member.clone()) {
                        self.member_edges
                            .entry((dimension, member))
                            .or_default()
                            .insert(entity);
                        created += 1;
                    }
                }
                created
            }
            GraphMutation::UnlinkMembers {
                entity,
                dimension,
                members,
            } => {
                let mut removed = 0;
                for member in members {
                    let Some(set) = self
                        .relevance
                        .get_mut(&entity)
                        .and_then(|dims| dims.get_mut(&dimension))
                    else {
                        break;
                    };
                    if set.remove(&member) {
                        if let Some(linked) = self.member_edges.get_mut(&(dimension, member)) {
                            linked.remove(&entity);
                        }
                        removed += 1;
                    }
                }
                removed
            }
            GraphMutation::InsertRelationship(rel) => {
                self.outbound.entry(rel.source).or_default().insert(rel.id);
                self.inbound.entry(rel.target).or_default().insert(rel.id);
                self.relationships.insert(rel.id, rel);
                1
            }
            GraphMutation::UpdateRelationship(rel) => {
                self.relationships.insert(rel.id, rel);
                1
            }
            GraphMutation::DeleteRelationship { id } => usize::from(self.remove_relationship(id)),
        }
    }

    fn with_entity(&mut self, id: EntityId, f: impl FnOnce(&mut Entity)) -> usize {
        self.entities.get_mut(&id).map_or(0, |e| {
            f(e);
            1
        })
    }

    fn remove_relationship(&mut self, id: RelationshipId) -> bool {
        let Some(rel) = self.relationships.remove(&id) else {
            return false;
        };
        if let Some(ids) = self.outbound.get_mut(&rel.source) {
            ids.remove(&id);
        }
        if let Some(ids) = self.inbound.get_mut(&rel.target) {
            ids.remove(&id);
        }
        true
    }

    fn detach_entity(&mut self, id: EntityId) -> usize {
        if self.entities.remove(&id).is_none() {
            return 0;
        }
        let mut affected = 1;

        if let Some(dims) = self.relevance.remove(&id) {
            for (dimension, members) in dims {
                for member in members {
                    if let Some(linked) = self.member_edges.get_mut(&(dimension, member)) {
                        linked.remove(&id);
                    }
                    affected += 1;
                }
            }
        }

        let mut rel_ids: BTreeSet<RelationshipId> = self.outbound.remove(&id).unwrap_or_default();
        rel_ids.extend(self.inbound.remove(&id).unwrap_or_default());
        for rel_id in rel_ids {
            if self.remove_relationship(rel_id) {
                affected += 1;
            }
        }
        affected
    }

    pub(crate) fn list_members(&self, dimension: Dimension) -> BTreeSet<String> {
        self.members.get(&dimension).cloned().unwrap_or_default()
    }

    pub(crate) fn member_exists(&self, dimension: Dimension, key: &str) -> bool {
        self.has_member(dimension, key)
    }

    pub(crate) fn get_entity(&self, id: EntityId) -> Option<Entity> {
        self.entities.get(&id).cloned()
    }

    pub(crate) fn list_entities(&self, kind: EntityKind) -> Vec<Entity> {
        self.entities.values().filter(|e| e.kind == kind).cloned().collect()
    }

    pub(crate) fn relevance_edges(&self, entity: EntityId, dimension: Dimension) -> BTreeSet<String> {
        self.relevance
            .get(&entity)
            .and_then(|dims| dims.get(&dimension))
            .cloned()
            .unwrap_or_default()
    }

    fn collect(&self, ids: Option<&BTreeSet<RelationshipId>>) -> Vec<Relationship> {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.relationships.get(id).cloned())
            .collect()
    }

    pub(crate) fn relationships_from(&self, source: EntityId) -> Vec<Relationship> {
        self.collect(self.outbound.get(&source))
    }

    pub(crate) fn relationships_to(&self, target: EntityId) -> Vec<Relationship> {
        self.collect(self.inbound.get(&target))
    }

    pub(crate) fn relationships_between(&self, source: EntityId, target: EntityId) -> Vec<Relationship> {
        self.relationships_from(source)
            .into_iter()
            .filter(|r| r.target == target)
            .collect()
    }

    /// Mutations that rebuild this state from empty, in dependency order.
    pub(crate) fn snapshot_mutations(&self) -> Vec<GraphMutation> {
        let mut out = Vec::new();
        for (dimension, keys) in &self.members {
            for key in keys {
                out.push(GraphMutation::UpsertMember {
                    dimension: *dimension,
                    key: key.clone(),
                });
            }
        }
        for entity in self.entities.values() {
            out.push(GraphMutation::InsertEntity(entity.clone()));
        }
        for (entity, dims) in &self.relevance {
            for (dimension, members) in dims {
                if members.is_empty() {
                    continue;
                }
                out.push(GraphMutation::LinkMembers {
                    entity: *entity,
                    dimension: *dimension,
                    members: members.iter().cloned().collect(),
                });
            }
        }
        let mut rels: Vec<&Relationship> = self.relationships.values().collect();
        rels.sort_by_key(|r| r.id);
        for rel in rels {
            out.push(GraphMutation::InsertRelationship(rel.clone()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(state: &mut GraphState, m: GraphMutation) -> usize {
        if state.precheck(&m).unwrap() {
            state.apply(m)
        } else {
            0
        }
    }

    #[test]
    fn test_link_skips_missing_members_and_is_idempotent() {
        let mut state = GraphState::default();
        let e = Entity::new(EntityKind::Object, "A", "*|*|*|*");
        let id = e.id;
        apply(&mut state, GraphMutation::InsertEntity(e));
        apply(
            &mut state,
            GraphMutation::UpsertMember {
                dimension: Dimension::Sector,
                key: "Energy".to_string(),
            },
        );

        let link = GraphMutation::LinkMembers {
            entity: id,
            dimension: Dimension::Sector,
            members: vec!["Energy".to_string(), "Ghost".to_string()],
        };
        assert_eq!(apply(&mut state, link.clone()), 1);
        assert!(!state.precheck(&link).unwrap());
        assert_eq!(state.relevance_edges(id, Dimension::Sector).len(), 1);
    }

    #[test]
    fn test_snapshot_rebuilds_equivalent_state() {
        let mut state = GraphState::default();
        let a = Entity::new(EntityKind::Object, "A", "*|*|*|*");
        let rel = Relationship::new(&a, &a, "A", "Critical", "Intra-Table");
        let id = a.id;
        apply(&mut state, GraphMutation::InsertEntity(a));
        apply(&mut state, GraphMutation::InsertRelationship(rel));

        let mut rebuilt = GraphState::default();
        for m in state.snapshot_mutations() {
            apply(&mut rebuilt, m);
        }
        assert_eq!(rebuilt.relationships_between(id, id).len(), 1);
        assert!(rebuilt.get_entity(id).is_some());
    }

    #[test]
    fn test_field_setters_leave_other_fields_alone() {
        let mut state = GraphState::default();
        let a = Entity::new(EntityKind::Object, "A", "*|*|*|*");
        let id = a.id;
        apply(&mut state, GraphMutation::InsertEntity(a));

        let encode = GraphMutation::SetDriverEncoding {
            id,
            encoding: "*|Finance|*|*".to_string(),
            updated_at: Utc::now(),
        };
        assert_eq!(apply(&mut state, encode.clone()), 1);
        assert!(!state.precheck(&encode).unwrap());
        apply(&mut state, GraphMutation::SetRelationshipCount { id, count: 4 });

        let stored = state.get_entity(id).unwrap();
        assert_eq!(stored.driver_encoding, "*|Finance|*|*");
        assert_eq!(stored.relationship_count, 4);
        assert_eq!(stored.name, "A");

        let ghost = GraphMutation::SetRelationshipCount {
            id: EntityId::new(),
            count: 1,
        };
        assert!(matches!(state.precheck(&ghost), Err(StorageError::EntityNotFound(_))));
    }
}

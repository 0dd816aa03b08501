//! Consistency engine over a property-graph store.
//!
//! [`CatalogEngine`] is the single writer of driver encodings, relevance
//! edges and default relationships. It works against any [`GraphStore`]
//! and never assumes a pristine starting state: every pass diffs live
//! store contents against what should exist and repairs the difference.

mod cascade;
mod defaults;
mod relevance;

pub use cascade::{AffectedEntity, AffectedEntityReport};
pub use defaults::{BootstrapReport, EntityFailure, PairFailure, ReconcileReport};
pub use relevance::{
    resolve_selection, MemberAddedReport, NormalizeOutcome, NormalizeReport, RelevanceDrift,
    RelevanceOutcome, RelevancePassReport, SlotDrift,
};

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::config::EngineConfig;
use crate::dimension::{Dimension, MembershipSnapshot};
use crate::driver::{decode_lenient, DriverSelection};
use crate::entity::{Entity, EntityId, EntityKind};
use crate::error::{CatalogError, CatalogResult, ExecutionError, ValidationError};
use crate::relationship::{DefaultRelationshipPolicy, Relationship};
use crate::storage::{GraphStore, StorageError};

/// Counts the store writes of one unit of work so a failure can report
/// how far it got.
#[derive(Debug, Default)]
pub(crate) struct OpLedger {
    completed: usize,
}

impl OpLedger {
    /// Track a store write.
    pub(crate) fn write<T>(&mut self, result: Result<T, StorageError>) -> CatalogResult<T> {
        match result {
            Ok(value) => {
                self.completed += 1;
                Ok(value)
            }
            Err(err) => Err(CatalogError::from_storage(err, self.completed)),
        }
    }

    /// Map a store read; reads do not count as completed operations.
    pub(crate) fn read<T>(&self, result: Result<T, StorageError>) -> CatalogResult<T> {
        result.map_err(|err| CatalogError::from_storage(err, self.completed))
    }

    pub(crate) const fn completed(&self) -> usize {
        self.completed
    }
}

/// True for errors meaning the entity or relationship was removed by a
/// concurrent writer. Passes skip these rather than report them.
pub(crate) const fn is_vanished(err: &CatalogError) -> bool {
    matches!(
        err,
        CatalogError::Execution(
            ExecutionError::EntityNotFound { .. } | ExecutionError::RelationshipNotFound { .. }
        )
    )
}

fn validate_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyEntityName);
    }
    Ok(name.to_string())
}

/// Driver-relevance and relationship consistency engine.
#[derive(Clone)]
pub struct CatalogEngine {
    store: Arc<dyn GraphStore>,
    config: EngineConfig,
    policy: DefaultRelationshipPolicy,
}

impl fmt::Debug for CatalogEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CatalogEngine {
    /// Create an engine over `store`.
    pub fn new(store: Arc<dyn GraphStore>, config: EngineConfig) -> CatalogResult<Self> {
        let config = config.validate()?;
        let policy = config.policy();
        Ok(Self {
            store,
            config,
            policy,
        })
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The canonical predicate for default relationships.
    #[must_use]
    pub const fn policy(&self) -> &DefaultRelationshipPolicy {
        &self.policy
    }

    pub(crate) fn require_entity(&self, id: EntityId, ledger: &OpLedger) -> CatalogResult<Entity> {
        ledger
            .read(self.store.get_entity(id))?
            .ok_or_else(|| ExecutionError::EntityNotFound { id }.into())
    }

    pub(crate) fn snapshot(
        &self,
        dimensions: &[Dimension],
        ledger: &OpLedger,
    ) -> CatalogResult<MembershipSnapshot> {
        ledger.read(MembershipSnapshot::capture(self.store.as_registry(), dimensions))
    }

    /// Fetch an entity.
    pub fn get_entity(&self, id: EntityId) -> CatalogResult<Option<Entity>> {
        OpLedger::default().read(self.store.get_entity(id))
    }

    /// Every entity of `kind`, ordered by id.
    pub fn list_entities(&self, kind: EntityKind) -> CatalogResult<Vec<Entity>> {
        OpLedger::default().read(self.store.list_entities(kind))
    }

    /// The structured selection behind an entity's driver encoding.
    pub fn selection(&self, id: EntityId) -> CatalogResult<DriverSelection> {
        let entity = self.require_entity(id, &OpLedger::default())?;
        Ok(decode_lenient(entity.kind, &entity.driver_encoding))
    }

    /// The members currently linked to an entity on `dimension`.
    pub fn relevance_edges(&self, id: EntityId, dimension: Dimension) -> CatalogResult<BTreeSet<String>> {
        OpLedger::default().read(self.store.relevance_edges(id, dimension))
    }

    /// Create an entity, link its relevance edges and, for Objects, the
    /// default relationships involving it.
    ///
    /// Explicit members that do not exist are dropped from the stored
    /// encoding.
    pub fn create_entity(&self, kind: EntityKind, name: &str, encoding: &str) -> CatalogResult<Entity> {
        let name = validate_name(name)?;
        let mut ledger = OpLedger::default();

        let entity = Entity::new(kind, name, encoding);
        let id = entity.id;
        let selection = decode_lenient(kind, encoding);
        ledger.write(self.store.insert_entity(entity.clone()))?;

        let snapshot = self.snapshot(kind.layout(), &ledger)?;
        let outcome = self.apply_entity(entity, selection, &snapshot, &mut ledger)?;

        let defaults_created = if kind == EntityKind::Object {
            self.ensure_defaults_for(id, &mut ledger)?
        } else {
            0
        };

        info!(
            %id,
            %kind,
            encoding = %outcome.encoding,
            edges = outcome.edges_created,
            defaults_created,
            "created entity"
        );
        self.require_entity(id, &ledger)
    }

    /// Replace an entity's driver encoding and re-apply its relevance edges.
    pub fn update_drivers(&self, id: EntityId, encoding: &str) -> CatalogResult<RelevanceOutcome> {
        let mut ledger = OpLedger::default();
        let entity = self.require_entity(id, &ledger)?;
        let selection = decode_lenient(entity.kind, encoding);
        let snapshot = self.snapshot(entity.kind.layout(), &ledger)?;
        self.apply_entity(entity, selection, &snapshot, &mut ledger)
    }

    /// Rename an entity, carrying its default relationships along.
    ///
    /// Canonical outbound defaults take the new name as their role;
    /// relationships pointing at the entity get the new target name.
    pub fn rename_entity(&self, id: EntityId, name: &str) -> CatalogResult<Entity> {
        let name = validate_name(name)?;
        let mut ledger = OpLedger::default();
        let entity = self.require_entity(id, &ledger)?;
        if entity.name == name {
            return Ok(entity);
        }

        let old_name = entity.name;
        ledger.write(self.store.set_name(id, &name))?;

        for mut rel in ledger.read(self.store.relationships_from(id))? {
            let canonical = self.policy.is_canonical(&rel, &old_name);
            if canonical {
                rel.role.clone_from(&name);
            }
            if rel.target == id {
                rel.target_name.clone_from(&name);
            }
            if canonical || rel.target == id {
                ledger.write(self.store.update_relationship(rel))?;
            }
        }
        for mut rel in ledger.read(self.store.relationships_to(id))? {
            if rel.source == id {
                continue;
            }
            rel.target_name.clone_from(&name);
            ledger.write(self.store.update_relationship(rel))?;
        }

        // A custom relationship whose role equals the new name is canonical now.
        self.refresh_relationship_count(id, &mut ledger)?;
        info!(%id, from = %old_name, to = %name, "renamed entity");
        self.require_entity(id, &ledger)
    }

    /// Detach-delete an entity and refresh the cached counts of the
    /// remaining entities of its kind.
    pub fn delete_entity(&self, id: EntityId) -> CatalogResult<Entity> {
        let mut ledger = OpLedger::default();
        let entity = self.require_entity(id, &ledger)?;
        ledger.write(self.store.delete_entity(id))?;

        let mut counts_updated = 0usize;
        if entity.kind == EntityKind::Object {
            for other in ledger.read(self.store.list_entities(entity.kind))? {
                match self.refresh_relationship_count(other.id, &mut ledger) {
                    Ok(changed) => counts_updated += usize::from(changed),
                    Err(e) if is_vanished(&e) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        info!(%id, kind = %entity.kind, counts_updated, "deleted entity");
        Ok(entity)
    }

    /// Add a custom relationship between two entities of the same kind.
    pub fn add_relationship(
        &self,
        source: EntityId,
        target: EntityId,
        role: &str,
        frequency: &str,
        rel_type: &str,
    ) -> CatalogResult<Relationship> {
        let mut ledger = OpLedger::default();
        let src = self.require_entity(source, &ledger)?;
        let tgt = self.require_entity(target, &ledger)?;
        if src.kind != tgt.kind {
            return Err(ValidationError::KindMismatch {
                source_kind: src.kind,
                target_kind: tgt.kind,
            }
            .into());
        }

        let rel = Relationship::new(&src, &tgt, role, frequency, rel_type);
        ledger.write(self.store.insert_relationship(rel.clone()))?;
        self.refresh_relationship_count(source, &mut ledger)?;
        Ok(rel)
    }
}

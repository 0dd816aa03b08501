//! Default relationship maintenance.
//!
//! Every ordered pair of Objects, self-pairs included, owns exactly one
//! canonical default relationship. Both passes work pair by pair and are
//! safe to re-run from any intermediate state.

use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use super::{is_vanished, CatalogEngine, OpLedger};
use crate::entity::{Entity, EntityId, EntityKind};
use crate::error::{CatalogResult, ExecutionError};
use crate::relationship::{Relationship, RelationshipId};
use crate::storage::StorageError;

/// A pair that could not be processed during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairFailure {
    pub source: EntityId,
    pub target: EntityId,
    pub error: String,
}

/// An entity that could not be processed during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityFailure {
    pub entity: EntityId,
    pub error: String,
}

/// Summary of [`CatalogEngine::bootstrap_missing`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BootstrapReport {
    pub entities: usize,
    pub pairs_checked: usize,
    pub created: usize,
    pub counts_updated: usize,
    pub failures: Vec<PairFailure>,
    pub count_failures: Vec<EntityFailure>,
    pub operations_completed: usize,
}

/// Summary of [`CatalogEngine::reconcile_exact`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub entities: usize,
    pub pairs_checked: usize,
    pub created: usize,
    /// Relationships failing the canonical predicate that were deleted.
    pub non_canonical_deleted: usize,
    /// Canonical relationships beyond the first that were deleted.
    pub duplicates_deleted: usize,
    pub counts_updated: usize,
    pub failures: Vec<PairFailure>,
    pub count_failures: Vec<EntityFailure>,
    pub operations_completed: usize,
}

/// Tracks back-to-back pair failures within a pass.
struct FailureStreak {
    consecutive: usize,
    limit: usize,
}

impl FailureStreak {
    const fn new(limit: usize) -> Self {
        Self {
            consecutive: 0,
            limit,
        }
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }

    /// Record a failure; errors once the streak reaches the limit.
    fn record(&mut self, ledger: &OpLedger) -> CatalogResult<()> {
        self.consecutive += 1;
        if self.consecutive >= self.limit {
            warn!(consecutive = self.consecutive, "aborting pass: store appears unavailable");
            return Err(ExecutionError::PassAborted {
                consecutive_failures: self.consecutive,
                operations_completed: ledger.completed(),
            }
            .into());
        }
        Ok(())
    }
}

/// Sort so the relationship to keep, the smallest id string, comes first.
fn order_for_keep(mut rels: Vec<Relationship>) -> Vec<Relationship> {
    rels.sort_by(|a, b| a.id.to_string().cmp(&b.id.to_string()));
    rels
}

impl CatalogEngine {
    /// Recompute an entity's cached count of canonical outbound defaults.
    /// Returns true if the stored value changed.
    pub(crate) fn refresh_relationship_count(&self, id: EntityId, ledger: &mut OpLedger) -> CatalogResult<bool> {
        let entity = self.require_entity(id, ledger)?;
        let count = ledger
            .read(self.store.relationships_from(id))?
            .iter()
            .filter(|rel| self.policy.is_canonical(rel, &entity.name))
            .count() as u64;
        if entity.relationship_count == count {
            return Ok(false);
        }
        debug!(entity = %id, from = entity.relationship_count, to = count, "correcting relationship count");
        ledger.write(self.store.set_relationship_count(id, count))
    }

    /// Create the canonical default for `(source, target)` unless one
    /// exists. Returns true if one was created.
    fn ensure_pair(&self, source: &Entity, target: &Entity, ledger: &mut OpLedger) -> CatalogResult<bool> {
        let existing = ledger.read(self.store.relationships_between(source.id, target.id))?;
        if existing.iter().any(|rel| self.policy.is_canonical(rel, &source.name)) {
            return Ok(false);
        }
        ledger.write(self.store.insert_relationship(self.policy.canonical(source, target)))?;
        Ok(true)
    }

    /// Delete a relationship, treating one already gone as deleted.
    fn remove_relationship(&self, id: RelationshipId, ledger: &mut OpLedger) -> CatalogResult<()> {
        match self.store.delete_relationship(id) {
            Err(StorageError::RelationshipNotFound(_)) => Ok(()),
            other => ledger.write(other),
        }
    }

    /// Create every default involving a freshly created Object and refresh
    /// the counts it affects. Returns the number created.
    pub(crate) fn ensure_defaults_for(&self, id: EntityId, ledger: &mut OpLedger) -> CatalogResult<usize> {
        let entity = self.require_entity(id, ledger)?;
        let objects = ledger.read(self.store.list_entities(EntityKind::Object))?;

        let mut created = 0;
        for other in &objects {
            created += usize::from(self.ensure_pair(&entity, other, ledger)?);
            if other.id != entity.id {
                created += usize::from(self.ensure_pair(other, &entity, ledger)?);
            }
        }
        for other in &objects {
            match self.refresh_relationship_count(other.id, ledger) {
                Ok(_) => {}
                Err(e) if is_vanished(&e) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(created)
    }

    /// Add-only pass: create the canonical default for every ordered pair
    /// of Objects that lacks one. Never deletes.
    ///
    /// Pair failures are collected; the pass aborts only after
    /// `max_consecutive_pair_failures` failures in a row.
    pub fn bootstrap_missing(&self) -> CatalogResult<BootstrapReport> {
        let _span = info_span!("bootstrap_missing").entered();
        let mut ledger = OpLedger::default();
        let mut streak = FailureStreak::new(self.config.max_consecutive_pair_failures);
        let objects = ledger.read(self.store.list_entities(EntityKind::Object))?;
        let mut report = BootstrapReport {
            entities: objects.len(),
            ..BootstrapReport::default()
        };

        for source in &objects {
            for target in &objects {
                report.pairs_checked += 1;
                match self.ensure_pair(source, target, &mut ledger) {
                    Ok(created) => {
                        report.created += usize::from(created);
                        streak.reset();
                    }
                    Err(e) if is_vanished(&e) => {
                        debug!(source = %source.id, target = %target.id, "pair vanished mid-pass");
                        streak.reset();
                    }
                    Err(e) => {
                        warn!(source = %source.id, target = %target.id, error = %e, "failed to bootstrap pair");
                        report.failures.push(PairFailure {
                            source: source.id,
                            target: target.id,
                            error: e.to_string(),
                        });
                        streak.record(&ledger)?;
                    }
                }
            }
        }

        for source in &objects {
            match self.refresh_relationship_count(source.id, &mut ledger) {
                Ok(changed) => report.counts_updated += usize::from(changed),
                Err(e) if is_vanished(&e) => {}
                Err(e) => report.count_failures.push(EntityFailure {
                    entity: source.id,
                    error: e.to_string(),
                }),
            }
        }

        report.operations_completed = ledger.completed();
        info!(
            entities = report.entities,
            pairs = report.pairs_checked,
            created = report.created,
            counts_updated = report.counts_updated,
            failures = report.failures.len(),
            "bootstrap pass complete"
        );
        Ok(report)
    }

    /// Bring one pair to exactly one canonical relationship and nothing else.
    ///
    /// The missing canonical is created before anything is deleted so the
    /// pair is never left without a default.
    fn reconcile_pair(
        &self,
        source: &Entity,
        target: &Entity,
        ledger: &mut OpLedger,
        report: &mut ReconcileReport,
    ) -> CatalogResult<()> {
        let (canonical, other): (Vec<_>, Vec<_>) = ledger
            .read(self.store.relationships_between(source.id, target.id))?
            .into_iter()
            .partition(|rel| self.policy.is_canonical(rel, &source.name));
        let canonical = order_for_keep(canonical);

        if canonical.is_empty() {
            ledger.write(self.store.insert_relationship(self.policy.canonical(source, target)))?;
            report.created += 1;
        }
        for dup in canonical.iter().skip(1) {
            debug!(source = %source.id, target = %target.id, relationship = %dup.id, "deleting duplicate default relationship");
            self.remove_relationship(dup.id, ledger)?;
            report.duplicates_deleted += 1;
        }
        for rel in other {
            debug!(
                source = %source.id,
                target = %target.id,
                relationship = %rel.id,
                role = %rel.role,
                frequency = %rel.frequency,
                rel_type = %rel.rel_type,
                "deleting non-canonical relationship"
            );
            self.remove_relationship(rel.id, ledger)?;
            report.non_canonical_deleted += 1;
        }
        Ok(())
    }

    /// Exact pass: leave every ordered pair of Objects with one canonical
    /// default and no other relationship, then correct every cached count.
    ///
    /// Destructive: relationships failing the canonical predicate are
    /// deleted. Among canonical duplicates the one with the smallest id
    /// string is kept.
    pub fn reconcile_exact(&self) -> CatalogResult<ReconcileReport> {
        let _span = info_span!("reconcile_exact").entered();
        let mut ledger = OpLedger::default();
        let mut streak = FailureStreak::new(self.config.max_consecutive_pair_failures);
        let objects = ledger.read(self.store.list_entities(EntityKind::Object))?;
        let mut report = ReconcileReport {
            entities: objects.len(),
            ..ReconcileReport::default()
        };

        for source in &objects {
            for target in &objects {
                report.pairs_checked += 1;
                match self.reconcile_pair(source, target, &mut ledger, &mut report) {
                    Ok(()) => streak.reset(),
                    Err(e) if is_vanished(&e) => {
                        debug!(source = %source.id, target = %target.id, "pair vanished mid-pass");
                        streak.reset();
                    }
                    Err(e) => {
                        warn!(source = %source.id, target = %target.id, error = %e, "failed to reconcile pair");
                        report.failures.push(PairFailure {
                            source: source.id,
                            target: target.id,
                            error: e.to_string(),
                        });
                        streak.record(&ledger)?;
                    }
                }
            }
        }

        for source in &objects {
            match self.refresh_relationship_count(source.id, &mut ledger) {
                Ok(changed) => report.counts_updated += usize::from(changed),
                Err(e) if is_vanished(&e) => {}
                Err(e) => report.count_failures.push(EntityFailure {
                    entity: source.id,
                    error: e.to_string(),
                }),
            }
        }

        report.operations_completed = ledger.completed();
        info!(
            entities = report.entities,
            pairs = report.pairs_checked,
            created = report.created,
            non_canonical_deleted = report.non_canonical_deleted,
            duplicates_deleted = report.duplicates_deleted,
            counts_updated = report.counts_updated,
            failures = report.failures.len(),
            "reconcile pass complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::EngineConfig;
    use crate::storage::InMemoryGraphStore;

    fn engine() -> CatalogEngine {
        CatalogEngine::new(Arc::new(InMemoryGraphStore::new()), EngineConfig::default()).unwrap()
    }

    /// Insert objects directly, bypassing the online path.
    fn raw_objects(engine: &CatalogEngine, names: &[&str]) -> Vec<Entity> {
        names
            .iter()
            .map(|name| {
                let e = Entity::new(EntityKind::Object, *name, "*|*|*|*");
                engine.store().insert_entity(e.clone()).unwrap();
                e
            })
            .collect()
    }

    #[test]
    fn test_order_for_keep_uses_id_string() {
        let a = Entity::new(EntityKind::Object, "A", "*|*|*|*");
        let rels: Vec<Relationship> = (0..5)
            .map(|_| Relationship::new(&a, &a, "A", "Critical", "Intra-Table"))
            .collect();
        let smallest = rels.iter().map(|r| r.id.to_string()).min().unwrap();
        assert_eq!(order_for_keep(rels)[0].id.to_string(), smallest);
    }

    #[test]
    fn test_failure_streak_aborts_at_limit() {
        let ledger = OpLedger::default();
        let mut streak = FailureStreak::new(2);
        assert!(streak.record(&ledger).is_ok());
        streak.reset();
        assert!(streak.record(&ledger).is_ok());
        let err = streak.record(&ledger).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_bootstrap_is_add_only() {
        let engine = engine();
        let objects = raw_objects(&engine, &["A", "B"]);
        let (a, b) = (&objects[0], &objects[1]);
        engine.add_relationship(a.id, b.id, "X", "Rare", "Inter-Table").unwrap();

        let report = engine.bootstrap_missing().unwrap();
        assert_eq!(report.pairs_checked, 4);
        assert_eq!(report.created, 4);
        assert_eq!(engine.store().relationships_between(a.id, b.id).unwrap().len(), 2);
        assert_eq!(engine.get_entity(a.id).unwrap().unwrap().relationship_count, 2);

        assert_eq!(engine.bootstrap_missing().unwrap().created, 0);
    }

    #[test]
    fn test_reconcile_keeps_one_of_duplicates() {
        let engine = engine();
        let objects = raw_objects(&engine, &["A"]);
        let a = &objects[0];
        let policy = engine.policy().clone();
        for _ in 0..3 {
            engine.store().insert_relationship(policy.canonical(a, a)).unwrap();
        }
        let expected_keep = engine
            .store()
            .relationships_between(a.id, a.id)
            .unwrap()
            .iter()
            .map(|r| r.id.to_string())
            .min()
            .unwrap();

        let report = engine.reconcile_exact().unwrap();
        assert_eq!(report.created, 0);
        assert_eq!(report.duplicates_deleted, 2);
        assert_eq!(report.counts_updated, 1);

        let left = engine.store().relationships_between(a.id, a.id).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id.to_string(), expected_keep);
        assert_eq!(engine.get_entity(a.id).unwrap().unwrap().relationship_count, 1);
    }

    #[test]
    fn test_reconcile_respects_renamed_role() {
        let engine = engine();
        let a = engine.create_entity(EntityKind::Object, "A", "*|*|*|*").unwrap();
        let mut stale = engine.get_entity(a.id).unwrap().unwrap();
        // Name changed behind the engine's back: the old default no longer
        // matches the predicate.
        stale.name = "Renamed".to_string();
        engine.store().update_entity(stale).unwrap();

        let report = engine.reconcile_exact().unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.non_canonical_deleted, 1);
        let rels = engine.store().relationships_from(a.id).unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].role, "Renamed");
    }
}

//! Member removal cascade.
//!
//! Removing a member rewrites every explicit selection that named it. A
//! selection left with no members becomes `Unresolved` and waits for the
//! user to re-select. Wildcard selections track membership on their own
//! and are never rewritten.
//!
//! The member node is deleted only after every encoding is rewritten. An
//! interrupted run leaves the node and its edges in place, so a re-run
//! still finds the entities the earlier run already rewrote.

use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use super::defaults::EntityFailure;
use super::{is_vanished, CatalogEngine, OpLedger};
use crate::dimension::Dimension;
use crate::driver::{decode_lenient, encode, Selection};
use crate::entity::{EntityId, EntityKind};
use crate::error::CatalogResult;

/// One entity whose encoding the cascade rewrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AffectedEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    pub prior_encoding: String,
    pub new_encoding: String,
    /// The slot lost its last member and needs re-selection.
    pub needs_reselection: bool,
    /// Rewritten by an earlier, interrupted run. `prior_encoding` is
    /// reconstructed by adding the member back to the slot.
    pub resumed: bool,
}

/// Entities rewritten by removing one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AffectedEntityReport {
    pub dimension: Dimension,
    pub member: String,
    /// Whether the member node still existed when the cascade ran.
    pub member_deleted: bool,
    pub affected: Vec<AffectedEntity>,
    /// Entities whose edges could not be re-synced after the member was
    /// deleted. `apply_relevance` repairs them.
    pub sync_failures: Vec<EntityFailure>,
    pub operations_completed: usize,
}

impl AffectedEntityReport {
    /// Entities that now need the user to pick members again.
    pub fn needing_reselection(&self) -> impl Iterator<Item = &AffectedEntity> + '_ {
        self.affected.iter().filter(|a| a.needs_reselection)
    }
}

/// `slot` as it was before `member` was removed from it.
fn with_member(slot: &Selection, member: &str) -> Selection {
    match slot {
        Selection::Explicit(set) => Selection::explicit(set.iter().map(String::as_str).chain([member])),
        Selection::Unresolved | Selection::Wildcard => Selection::explicit([member]),
    }
}

impl CatalogEngine {
    /// Delete a dimension member, cascading to every entity that named it.
    ///
    /// The report lists each rewritten entity with its prior and new
    /// encoding. Safe to re-run after a failure: entities rewritten by the
    /// failed run are reported again, flagged as `resumed`.
    pub fn remove_member(&self, dimension: Dimension, member: &str) -> CatalogResult<AffectedEntityReport> {
        self.on_member_removed(dimension, member)
    }

    /// Cascade the removal of `member`, deleting its node if it still
    /// exists.
    pub fn on_member_removed(&self, dimension: Dimension, member: &str) -> CatalogResult<AffectedEntityReport> {
        let _span = info_span!("on_member_removed", %dimension, member).entered();
        let mut ledger = OpLedger::default();
        let snapshot = self.snapshot(&[dimension], &ledger)?;
        let member_exists = snapshot.contains(dimension, member);

        let mut affected = Vec::new();
        for kind in [EntityKind::Object, EntityKind::Variable] {
            if !kind.uses(dimension) {
                continue;
            }
            for entity in ledger.read(self.store.list_entities(kind))? {
                let mut selection = decode_lenient(kind, &entity.driver_encoding);
                let Some(slot) = selection.get_mut(dimension) else {
                    continue;
                };

                if slot.remove_member(member) {
                    let needs_reselection = slot.is_unresolved();
                    let new_encoding = encode(&selection);
                    debug!(entity = %entity.id, from = %entity.driver_encoding, to = %new_encoding, "rewriting encoding for removed member");
                    ledger.write(self.store.set_driver_encoding(entity.id, &new_encoding))?;
                    affected.push((
                        selection,
                        AffectedEntity {
                            id: entity.id,
                            kind,
                            name: entity.name,
                            prior_encoding: entity.driver_encoding,
                            new_encoding,
                            needs_reselection,
                            resumed: false,
                        },
                    ));
                    continue;
                }

                // Still linked to a member its slot no longer names: an
                // earlier run rewrote it and stopped before the delete.
                if !member_exists || slot.is_wildcard() {
                    continue;
                }
                let needs_reselection = slot.is_unresolved();
                let prior_slot = with_member(slot, member);
                if !ledger.read(self.store.relevance_edges(entity.id, dimension))?.contains(member) {
                    continue;
                }
                let mut prior = selection.clone();
                if let Some(slot) = prior.get_mut(dimension) {
                    *slot = prior_slot;
                }
                debug!(entity = %entity.id, "reporting entity rewritten by an interrupted removal");
                affected.push((
                    selection.clone(),
                    AffectedEntity {
                        id: entity.id,
                        kind,
                        name: entity.name,
                        prior_encoding: encode(&prior),
                        new_encoding: encode(&selection),
                        needs_reselection,
                        resumed: true,
                    },
                ));
            }
        }

        let member_deleted = ledger.write(self.store.delete_member(dimension, member))?;

        // The delete detached every edge to the member. Re-syncing only
        // repairs unrelated drift, so a failure here is reported rather
        // than losing the report.
        let mut remaining = snapshot;
        remaining.remove(dimension, member);
        let mut sync_failures = Vec::new();
        for (selection, entry) in &affected {
            let Some(slot) = selection.get(dimension) else {
                continue;
            };
            match self.sync_slot(entry.id, dimension, slot, &remaining, &mut ledger) {
                Ok(_) => {}
                Err(e) if is_vanished(&e) => {}
                Err(e) => {
                    warn!(entity = %entry.id, error = %e, "failed to re-sync edges after member removal");
                    sync_failures.push(EntityFailure {
                        entity: entry.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        let affected: Vec<AffectedEntity> = affected.into_iter().map(|(_, entry)| entry).collect();
        info!(
            member_deleted,
            affected = affected.len(),
            resumed = affected.iter().filter(|a| a.resumed).count(),
            unresolved = affected.iter().filter(|a| a.needs_reselection).count(),
            sync_failures = sync_failures.len(),
            "member removal cascaded"
        );
        Ok(AffectedEntityReport {
            dimension,
            member: member.to_string(),
            member_deleted,
            affected,
            sync_failures,
            operations_completed: ledger.completed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::EngineConfig;
    use crate::storage::InMemoryGraphStore;

    fn engine_with_domains(members: &[&str]) -> CatalogEngine {
        let engine =
            CatalogEngine::new(Arc::new(InMemoryGraphStore::new()), EngineConfig::default()).unwrap();
        for m in members {
            engine.add_member(Dimension::Domain, m).unwrap();
        }
        engine
    }

    #[test]
    fn test_cascade_shrinks_then_unresolves() {
        let engine = engine_with_domains(&["A", "B"]);
        let e = engine.create_entity(EntityKind::Object, "E", "*|A,B|*|*").unwrap();

        let first = engine.remove_member(Dimension::Domain, "A").unwrap();
        assert!(first.member_deleted);
        assert_eq!(first.affected.len(), 1);
        assert_eq!(first.affected[0].prior_encoding, "*|A,B|*|*");
        assert_eq!(first.affected[0].new_encoding, "*|B|*|*");
        assert!(!first.affected[0].needs_reselection);

        let second = engine.remove_member(Dimension::Domain, "B").unwrap();
        assert_eq!(second.affected[0].new_encoding, "*|?|*|*");
        assert_eq!(second.needing_reselection().count(), 1);
        assert!(engine.relevance_edges(e.id, Dimension::Domain).unwrap().is_empty());
    }

    #[test]
    fn test_with_member_restores_prior_slot() {
        assert_eq!(with_member(&Selection::Unresolved, "A"), Selection::explicit(["A"]));
        assert_eq!(
            with_member(&Selection::explicit(["B"]), "A"),
            Selection::explicit(["A", "B"])
        );
    }

    #[test]
    fn test_rerun_after_removal_is_empty() {
        let engine = engine_with_domains(&["A"]);
        engine.create_entity(EntityKind::Variable, "V", "*|A|*|*").unwrap();
        assert_eq!(engine.remove_member(Dimension::Domain, "A").unwrap().affected.len(), 1);

        let again = engine.remove_member(Dimension::Domain, "A").unwrap();
        assert!(!again.member_deleted);
        assert!(again.affected.is_empty());
    }

    #[test]
    fn test_removal_on_other_kinds_clarifier_is_ignored() {
        let engine = engine_with_domains(&[]);
        engine.add_member(Dimension::ObjectClarifier, "Raw").unwrap();
        let v = engine.create_entity(EntityKind::Variable, "V", "*|*|*|*").unwrap();
        let o = engine.create_entity(EntityKind::Object, "O", "*|*|*|Raw").unwrap();

        let report = engine.remove_member(Dimension::ObjectClarifier, "Raw").unwrap();
        assert_eq!(report.affected.len(), 1);
        assert_eq!(report.affected[0].id, o.id);
        assert_eq!(engine.get_entity(v.id).unwrap().unwrap().driver_encoding, "*|*|*|*");
    }
}

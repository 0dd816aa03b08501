//! Relevance resolution: keeping member-to-entity edges equal to the
//! members each driver selection resolves to.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use super::{is_vanished, CatalogEngine, EntityFailure, OpLedger};
use crate::dimension::{Dimension, MembershipSnapshot};
use crate::driver::{check_member_key, decode_lenient, encode, normalize, DriverSelection, Selection};
use crate::entity::{Entity, EntityId, EntityKind};
use crate::error::{CatalogResult, ValidationError};

const KINDS: [EntityKind; 2] = [EntityKind::Object, EntityKind::Variable];

/// The members `selection` resolves to on `dimension`.
///
/// `Wildcard` yields every member in the snapshot, `Explicit` the named
/// members that exist, `Unresolved` nothing.
#[must_use]
pub fn resolve_selection(
    selection: &Selection,
    dimension: Dimension,
    snapshot: &MembershipSnapshot,
) -> BTreeSet<String> {
    let members = snapshot.members(dimension);
    match selection {
        Selection::Wildcard => members.clone(),
        Selection::Explicit(set) => set.intersection(members).cloned().collect(),
        Selection::Unresolved => BTreeSet::new(),
    }
}

/// Result of applying relevance to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelevanceOutcome {
    pub entity: EntityId,
    /// The canonical encoding now stored.
    pub encoding: String,
    /// Whether the stored encoding had to be rewritten.
    pub encoding_rewritten: bool,
    pub edges_created: usize,
    pub edges_removed: usize,
}

impl RelevanceOutcome {
    /// Returns true if nothing had to change.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        !self.encoding_rewritten && self.edges_created == 0 && self.edges_removed == 0
    }
}

/// Summary of re-applying relevance to every entity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelevancePassReport {
    pub entities_scanned: usize,
    pub encodings_rewritten: usize,
    pub edges_created: usize,
    pub edges_removed: usize,
    pub failures: Vec<EntityFailure>,
    pub operations_completed: usize,
}

/// Result of adding a dimension member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberAddedReport {
    pub dimension: Dimension,
    pub member: String,
    /// Whether this call created the member node. `None` when the member
    /// was created elsewhere and only propagated here.
    pub created: Option<bool>,
    /// Wildcard entities that gained an edge to the member.
    pub entities_linked: usize,
}

/// Edge differences on one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotDrift {
    pub dimension: Dimension,
    /// Edges the selection resolves to that are absent.
    pub missing: BTreeSet<String>,
    /// Edges present that the selection does not resolve to.
    pub extra: BTreeSet<String>,
}

/// Read-only audit of one entity's relevance state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelevanceDrift {
    pub entity: EntityId,
    pub slots: Vec<SlotDrift>,
    /// Set when the stored encoding differs from its canonical form.
    pub canonical_encoding: Option<String>,
}

impl RelevanceDrift {
    /// Returns true if edges and encoding are both converged.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.slots.is_empty() && self.canonical_encoding.is_none()
    }
}

/// Result of normalizing one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizeOutcome {
    pub entity: EntityId,
    /// Explicit slots that covered every member and became `Wildcard`.
    pub slots_collapsed: usize,
    pub encoding: String,
    pub changed: bool,
}

/// Summary of a normalization pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizeReport {
    pub entities_scanned: usize,
    pub entities_changed: usize,
    pub slots_collapsed: usize,
    pub failures: Vec<EntityFailure>,
    pub operations_completed: usize,
}

/// Drop explicit references to members absent from `snapshot`.
fn drop_stale_members(entity: &Entity, selection: &mut DriverSelection, snapshot: &MembershipSnapshot) {
    for &dimension in entity.kind.layout() {
        let Some(slot) = selection.get_mut(dimension) else {
            continue;
        };
        let members = snapshot.members(dimension);
        let replacement = match &*slot {
            Selection::Explicit(set) if !set.is_subset(members) => {
                let stale: Vec<&String> = set.difference(members).collect();
                debug!(entity = %entity.id, %dimension, ?stale, "dropping references to missing members");
                Some(Selection::explicit(set.intersection(members).cloned()))
            }
            _ => None,
        };
        if let Some(kept) = replacement {
            *slot = kept;
        }
    }
}

impl CatalogEngine {
    /// The edge set `entity` should have on `dimension` right now.
    pub fn resolve_edges(&self, id: EntityId, dimension: Dimension) -> CatalogResult<BTreeSet<String>> {
        let ledger = OpLedger::default();
        let entity = self.require_entity(id, &ledger)?;
        let selection = decode_lenient(entity.kind, &entity.driver_encoding);
        let Some(slot) = selection.get(dimension) else {
            return Err(ValidationError::DimensionNotApplicable {
                dimension,
                kind: entity.kind,
            }
            .into());
        };
        let snapshot = self.snapshot(&[dimension], &ledger)?;
        Ok(resolve_selection(slot, dimension, &snapshot))
    }

    /// Bring one slot's edges in line with `selection`. Returns
    /// `(created, removed)`.
    pub(crate) fn sync_slot(
        &self,
        id: EntityId,
        dimension: Dimension,
        selection: &Selection,
        snapshot: &MembershipSnapshot,
        ledger: &mut OpLedger,
    ) -> CatalogResult<(usize, usize)> {
        let desired = resolve_selection(selection, dimension, snapshot);
        let existing = ledger.read(self.store.relevance_edges(id, dimension))?;

        let to_link: Vec<String> = desired.difference(&existing).cloned().collect();
        // A wildcard edge to a member created after the snapshot was taken
        // is left for that member's own propagation.
        let to_unlink: Vec<String> = existing
            .difference(&desired)
            .filter(|m| !selection.is_wildcard() || snapshot.contains(dimension, m))
            .cloned()
            .collect();

        let created = if to_link.is_empty() {
            0
        } else {
            ledger.write(self.store.link_members(id, dimension, &to_link))?
        };
        let removed = if to_unlink.is_empty() {
            0
        } else {
            ledger.write(self.store.unlink_members(id, dimension, &to_unlink))?
        };
        if created > 0 || removed > 0 {
            debug!(entity = %id, %dimension, created, removed, "synced relevance edges");
        }
        Ok((created, removed))
    }

    /// Make `entity`'s edges and stored encoding match `selection`.
    pub(crate) fn apply_entity(
        &self,
        entity: Entity,
        mut selection: DriverSelection,
        snapshot: &MembershipSnapshot,
        ledger: &mut OpLedger,
    ) -> CatalogResult<RelevanceOutcome> {
        drop_stale_members(&entity, &mut selection, snapshot);

        let (mut edges_created, mut edges_removed) = (0, 0);
        for (dimension, slot) in selection.iter() {
            let (created, removed) = self.sync_slot(entity.id, dimension, slot, snapshot, ledger)?;
            edges_created += created;
            edges_removed += removed;
        }

        let encoding = encode(&selection);
        let encoding_rewritten = encoding != entity.driver_encoding;
        if encoding_rewritten {
            debug!(entity = %entity.id, from = %entity.driver_encoding, to = %encoding, "rewriting driver encoding");
            ledger.write(self.store.set_driver_encoding(entity.id, &encoding))?;
        }

        Ok(RelevanceOutcome {
            entity: entity.id,
            encoding,
            encoding_rewritten,
            edges_created,
            edges_removed,
        })
    }

    /// Diff an entity's relevance edges against its selection and repair
    /// them, writing back the canonical encoding.
    ///
    /// Converged entities are left untouched, so repeated calls are no-ops.
    pub fn apply_relevance(&self, id: EntityId) -> CatalogResult<RelevanceOutcome> {
        let mut ledger = OpLedger::default();
        let entity = self.require_entity(id, &ledger)?;
        let selection = decode_lenient(entity.kind, &entity.driver_encoding);
        let snapshot = self.snapshot(entity.kind.layout(), &ledger)?;
        self.apply_entity(entity, selection, &snapshot, &mut ledger)
    }

    /// Re-apply relevance to every entity against one membership snapshot.
    pub fn apply_relevance_all(&self) -> CatalogResult<RelevancePassReport> {
        let _span = info_span!("apply_relevance_all").entered();
        let mut ledger = OpLedger::default();
        let snapshot = self.snapshot(&Dimension::ALL, &ledger)?;
        let mut report = RelevancePassReport::default();

        for kind in KINDS {
            for entity in ledger.read(self.store.list_entities(kind))? {
                report.entities_scanned += 1;
                let id = entity.id;
                let selection = decode_lenient(entity.kind, &entity.driver_encoding);
                match self.apply_entity(entity, selection, &snapshot, &mut ledger) {
                    Ok(outcome) => {
                        report.encodings_rewritten += usize::from(outcome.encoding_rewritten);
                        report.edges_created += outcome.edges_created;
                        report.edges_removed += outcome.edges_removed;
                    }
                    Err(e) if is_vanished(&e) => {}
                    Err(e) => {
                        warn!(entity = %id, error = %e, "failed to apply relevance");
                        report.failures.push(EntityFailure {
                            entity: id,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        report.operations_completed = ledger.completed();
        info!(
            entities = report.entities_scanned,
            rewritten = report.encodings_rewritten,
            created = report.edges_created,
            removed = report.edges_removed,
            failures = report.failures.len(),
            "relevance pass complete"
        );
        Ok(report)
    }

    /// Link a new member to every entity that is `Wildcard` on its
    /// dimension.
    pub fn on_member_added(&self, dimension: Dimension, member: &str) -> CatalogResult<MemberAddedReport> {
        let mut ledger = OpLedger::default();
        let entities_linked = self.propagate_member(dimension, member, &mut ledger)?;
        Ok(MemberAddedReport {
            dimension,
            member: member.to_string(),
            created: None,
            entities_linked,
        })
    }

    /// Create a dimension member and propagate it to wildcard entities.
    ///
    /// Re-adding an existing member is allowed and heals any wildcard
    /// entity missing its edge.
    pub fn add_member(&self, dimension: Dimension, member: &str) -> CatalogResult<MemberAddedReport> {
        check_member_key(member).map_err(|reason| ValidationError::InvalidMemberKey {
            key: member.to_string(),
            reason: reason.to_string(),
        })?;

        let mut ledger = OpLedger::default();
        let created = ledger.write(self.store.upsert_member(dimension, member))?;
        let entities_linked = self.propagate_member(dimension, member, &mut ledger)?;
        info!(%dimension, member, created, entities_linked, "added member");
        Ok(MemberAddedReport {
            dimension,
            member: member.to_string(),
            created: Some(created),
            entities_linked,
        })
    }

    fn propagate_member(&self, dimension: Dimension, member: &str, ledger: &mut OpLedger) -> CatalogResult<usize> {
        let snapshot = self.snapshot(&[dimension], ledger)?;
        if !snapshot.contains(dimension, member) {
            debug!(%dimension, member, "member no longer exists; nothing to propagate");
            return Ok(0);
        }

        let mut linked = 0;
        for kind in KINDS.into_iter().filter(|k| k.uses(dimension)) {
            for entity in ledger.read(self.store.list_entities(kind))? {
                let selection = decode_lenient(kind, &entity.driver_encoding);
                let Some(slot) = selection.get(dimension).filter(|s| s.is_wildcard()) else {
                    continue;
                };
                let (created, _) = self.sync_slot(entity.id, dimension, slot, &snapshot, ledger)?;
                linked += usize::from(created > 0);
            }
        }
        Ok(linked)
    }

    /// Compare an entity's edges and encoding to what they should be,
    /// without writing.
    pub fn verify_relevance(&self, id: EntityId) -> CatalogResult<RelevanceDrift> {
        let ledger = OpLedger::default();
        let entity = self.require_entity(id, &ledger)?;
        let snapshot = self.snapshot(entity.kind.layout(), &ledger)?;
        let mut selection = decode_lenient(entity.kind, &entity.driver_encoding);
        drop_stale_members(&entity, &mut selection, &snapshot);

        let mut slots = Vec::new();
        for (dimension, slot) in selection.iter() {
            let desired = resolve_selection(slot, dimension, &snapshot);
            let existing = ledger.read(self.store.relevance_edges(id, dimension))?;
            let missing: BTreeSet<String> = desired.difference(&existing).cloned().collect();
            let extra: BTreeSet<String> = existing.difference(&desired).cloned().collect();
            if !missing.is_empty() || !extra.is_empty() {
                slots.push(SlotDrift {
                    dimension,
                    missing,
                    extra,
                });
            }
        }

        let canonical = encode(&selection);
        Ok(RelevanceDrift {
            entity: id,
            slots,
            canonical_encoding: (canonical != entity.driver_encoding).then_some(canonical),
        })
    }

    fn normalize_with(
        &self,
        entity: Entity,
        snapshot: &MembershipSnapshot,
        ledger: &mut OpLedger,
    ) -> CatalogResult<NormalizeOutcome> {
        let id = entity.id;
        let mut selection = decode_lenient(entity.kind, &entity.driver_encoding);
        drop_stale_members(&entity, &mut selection, snapshot);

        let mut slots_collapsed = 0;
        for &dimension in entity.kind.layout() {
            if let Some(slot) = selection.get_mut(dimension) {
                let normalized = normalize(slot, snapshot.members(dimension));
                if normalized != *slot {
                    slots_collapsed += 1;
                    *slot = normalized;
                }
            }
        }

        let outcome = self.apply_entity(entity, selection, snapshot, ledger)?;
        Ok(NormalizeOutcome {
            entity: id,
            slots_collapsed,
            encoding: outcome.encoding,
            changed: outcome.encoding_rewritten,
        })
    }

    /// Collapse explicit slots covering every current member to
    /// `Wildcard`, then re-apply relevance.
    pub fn normalize_entity(&self, id: EntityId) -> CatalogResult<NormalizeOutcome> {
        let mut ledger = OpLedger::default();
        let entity = self.require_entity(id, &ledger)?;
        let snapshot = self.snapshot(entity.kind.layout(), &ledger)?;
        self.normalize_with(entity, &snapshot, &mut ledger)
    }

    /// Normalize every entity against one membership snapshot.
    ///
    /// Continues past per-entity failures and reports them.
    pub fn normalize_all(&self) -> CatalogResult<NormalizeReport> {
        let _span = info_span!("normalize_all").entered();
        let mut ledger = OpLedger::default();
        let snapshot = self.snapshot(&Dimension::ALL, &ledger)?;
        let mut report = NormalizeReport::default();

        for kind in KINDS {
            for entity in ledger.read(self.store.list_entities(kind))? {
                report.entities_scanned += 1;
                let id = entity.id;
                match self.normalize_with(entity, &snapshot, &mut ledger) {
                    Ok(outcome) => {
                        report.entities_changed += usize::from(outcome.changed);
                        report.slots_collapsed += outcome.slots_collapsed;
                    }
                    Err(e) if is_vanished(&e) => {}
                    Err(e) => {
                        warn!(entity = %id, error = %e, "failed to normalize entity");
                        report.failures.push(EntityFailure {
                            entity: id,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        report.operations_completed = ledger.completed();
        info!(
            entities = report.entities_scanned,
            changed = report.entities_changed,
            collapsed = report.slots_collapsed,
            failures = report.failures.len(),
            "normalization pass complete"
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

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_resolve_selection() {
        let snapshot = MembershipSnapshot::from_members(Dimension::Domain, ["A", "B"]);
        assert_eq!(
            resolve_selection(&Selection::Wildcard, Dimension::Domain, &snapshot),
            set(&["A", "B"])
        );
        assert_eq!(
            resolve_selection(&Selection::explicit(["B", "Gone"]), Dimension::Domain, &snapshot),
            set(&["B"])
        );
        assert!(resolve_selection(&Selection::Unresolved, Dimension::Domain, &snapshot).is_empty());
    }

    #[test]
    fn test_create_drops_missing_members_from_encoding() {
        let engine = engine();
        engine.add_member(Dimension::Sector, "Energy").unwrap();
        let e = engine
            .create_entity(EntityKind::Object, "Plants", "Energy,Mining|*|*|*")
            .unwrap();
        assert_eq!(e.driver_encoding, "Energy|*|*|*");
        assert_eq!(engine.relevance_edges(e.id, Dimension::Sector).unwrap(), set(&["Energy"]));

        let only_missing = engine.create_entity(EntityKind::Object, "Mines", "Mining|*|*|*").unwrap();
        assert_eq!(only_missing.driver_encoding, "?|*|*|*");
    }

    #[test]
    fn test_apply_heals_hand_removed_edge() {
        let engine = engine();
        engine.add_member(Dimension::Country, "FR").unwrap();
        engine.add_member(Dimension::Country, "DE").unwrap();
        let e = engine.create_entity(EntityKind::Variable, "GDP", "*|*|*|*").unwrap();

        engine
            .store()
            .unlink_members(e.id, Dimension::Country, &["FR".to_string()])
            .unwrap();
        let drift = engine.verify_relevance(e.id).unwrap();
        assert_eq!(drift.slots.len(), 1);
        assert_eq!(drift.slots[0].missing, set(&["FR"]));

        let outcome = engine.apply_relevance(e.id).unwrap();
        assert_eq!(outcome.edges_created, 1);
        assert!(engine.verify_relevance(e.id).unwrap().is_consistent());
        assert!(engine.apply_relevance(e.id).unwrap().is_noop());
    }

    #[test]
    fn test_add_member_rejects_reserved_keys() {
        let engine = engine();
        for key in ["*", "?", "a|b", "a,b", " padded", ""] {
            let err = engine.add_member(Dimension::Sector, key).unwrap_err();
            assert!(err.is_validation(), "{key:?} should be rejected");
        }
    }

    #[test]
    fn test_on_member_added_does_not_claim_creation() {
        let engine = engine();
        let wild = engine.create_entity(EntityKind::Variable, "W", "*|*|*|*").unwrap();
        engine.store().upsert_member(Dimension::Domain, "Finance").unwrap();

        let report = engine.on_member_added(Dimension::Domain, "Finance").unwrap();
        assert_eq!(report.created, None);
        assert_eq!(report.entities_linked, 1);
        assert_eq!(engine.relevance_edges(wild.id, Dimension::Domain).unwrap(), set(&["Finance"]));
    }

    #[test]
    fn test_add_member_links_only_wildcard_entities() {
        let engine = engine();
        engine.add_member(Dimension::Sector, "Energy").unwrap();
        let wild = engine.create_entity(EntityKind::Object, "W", "*|*|*|*").unwrap();
        let pinned = engine.create_entity(EntityKind::Object, "P", "Energy|*|*|*").unwrap();

        let report = engine.add_member(Dimension::Sector, "Health").unwrap();
        assert_eq!(report.created, Some(true));
        assert_eq!(report.entities_linked, 1);
        assert_eq!(
            engine.relevance_edges(wild.id, Dimension::Sector).unwrap(),
            set(&["Energy", "Health"])
        );
        assert_eq!(engine.relevance_edges(pinned.id, Dimension::Sector).unwrap(), set(&["Energy"]));

        let again = engine.add_member(Dimension::Sector, "Health").unwrap();
        assert_eq!(again.created, Some(false));
        assert_eq!(again.entities_linked, 0);
    }

    #[test]
    fn test_clarifier_member_only_reaches_its_kind() {
        let engine = engine();
        let object = engine.create_entity(EntityKind::Object, "O", "*|*|*|*").unwrap();
        let variable = engine.create_entity(EntityKind::Variable, "V", "*|*|*|*").unwrap();
        let report = engine.add_member(Dimension::VariableClarifier, "Monthly").unwrap();
        assert_eq!(report.entities_linked, 1);
        assert_eq!(
            engine.relevance_edges(variable.id, Dimension::VariableClarifier).unwrap(),
            set(&["Monthly"])
        );
        assert!(engine.resolve_edges(object.id, Dimension::VariableClarifier).is_err());
    }

    #[test]
    fn test_normalize_collapses_full_coverage() {
        let engine = engine();
        engine.add_member(Dimension::Domain, "A").unwrap();
        engine.add_member(Dimension::Domain, "B").unwrap();
        let full = engine.create_entity(EntityKind::Object, "Full", "*|B,A|*|*").unwrap();
        let partial = engine.create_entity(EntityKind::Object, "Part", "*|A|*|*").unwrap();
        assert_eq!(full.driver_encoding, "*|A,B|*|*");

        let report = engine.normalize_all().unwrap();
        assert_eq!(report.entities_scanned, 2);
        assert_eq!(report.entities_changed, 1);
        assert_eq!(report.slots_collapsed, 1);
        assert_eq!(engine.get_entity(full.id).unwrap().unwrap().driver_encoding, "*|*|*|*");
        assert_eq!(engine.get_entity(partial.id).unwrap().unwrap().driver_encoding, "*|A|*|*");

        let again = engine.normalize_entity(full.id).unwrap();
        assert!(!again.changed);
        assert_eq!(again.slots_collapsed, 0);
    }

    #[test]
    fn test_lenient_read_repairs_legacy_encoding() {
        let engine = engine();
        engine.add_member(Dimension::Sector, "Energy").unwrap();
        let e = engine.create_entity(EntityKind::Object, "Legacy", "Energy|*").unwrap();
        assert_eq!(e.driver_encoding, "Energy|*|*|*");

        let report = engine.apply_relevance_all().unwrap();
        assert_eq!(report.entities_scanned, 1);
        assert_eq!(report.encodings_rewritten, 0);
    }
}

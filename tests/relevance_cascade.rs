//! End-to-end relevance and cascade behavior.
//!
//! These tests drive the engine through its public operations only and
//! check the resulting edges and encodings against the in-memory store.

use std::collections::BTreeSet;
use std::sync::Arc;

use taxocat::{
    decode_lenient, CatalogEngine, Dimension, EngineConfig, EntityKind, InMemoryGraphStore,
    MemberStore, Selection,
};

fn engine() -> CatalogEngine {
    CatalogEngine::new(Arc::new(InMemoryGraphStore::new()), EngineConfig::default()).unwrap()
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

#[test]
fn test_apply_relevance_is_idempotent() {
    let engine = engine();
    for m in ["Energy", "Health"] {
        engine.add_member(Dimension::Sector, m).unwrap();
    }
    for m in ["FR", "DE", "IT"] {
        engine.add_member(Dimension::Country, m).unwrap();
    }
    let e = engine
        .create_entity(EntityKind::Object, "Plants", "Energy|*|FR,IT|*")
        .unwrap();

    let first: Vec<_> = Dimension::ALL
        .iter()
        .map(|d| engine.relevance_edges(e.id, *d).unwrap())
        .collect();
    let outcome = engine.apply_relevance(e.id).unwrap();
    assert!(outcome.is_noop(), "second apply must be a no-op diff: {outcome:?}");
    let second: Vec<_> = Dimension::ALL
        .iter()
        .map(|d| engine.relevance_edges(e.id, *d).unwrap())
        .collect();

    assert_eq!(first, second);
    assert_eq!(second[0], set(&["Energy"]));
    assert_eq!(second[2], set(&["FR", "IT"]));
}

#[test]
fn test_wildcard_tracks_new_members_without_retagging() {
    let engine = engine();
    engine.add_member(Dimension::Sector, "Energy").unwrap();
    let e = engine.create_entity(EntityKind::Object, "Plants", "*|*|*|*").unwrap();

    // Member created behind the engine: no propagation ran.
    engine.store().upsert_member(Dimension::Sector, "Mining").unwrap();
    assert_eq!(engine.relevance_edges(e.id, Dimension::Sector).unwrap(), set(&["Energy"]));

    let outcome = engine.apply_relevance(e.id).unwrap();
    assert_eq!(outcome.edges_created, 1);
    assert!(!outcome.encoding_rewritten);
    assert_eq!(
        engine.relevance_edges(e.id, Dimension::Sector).unwrap(),
        set(&["Energy", "Mining"])
    );
    assert_eq!(engine.get_entity(e.id).unwrap().unwrap().driver_encoding, "*|*|*|*");
}

#[test]
fn test_update_drivers_moves_edges() {
    let engine = engine();
    for m in ["A", "B", "C"] {
        engine.add_member(Dimension::Domain, m).unwrap();
    }
    let e = engine.create_entity(EntityKind::Variable, "V", "*|A,B|*|*").unwrap();

    let outcome = engine.update_drivers(e.id, "*|C,B|*|?").unwrap();
    assert_eq!(outcome.encoding, "*|B,C|*|?");
    assert_eq!(outcome.edges_created, 1);
    assert_eq!(outcome.edges_removed, 1);
    assert_eq!(engine.relevance_edges(e.id, Dimension::Domain).unwrap(), set(&["B", "C"]));
    assert!(engine.verify_relevance(e.id).unwrap().is_consistent());
}

#[test]
fn test_cascade_correctness() {
    let engine = engine();
    engine.add_member(Dimension::Domain, "A").unwrap();
    engine.add_member(Dimension::Domain, "B").unwrap();
    let e = engine.create_entity(EntityKind::Object, "E", "*|A,B|*|*").unwrap();

    let first = engine.remove_member(Dimension::Domain, "A").unwrap();
    assert_eq!(first.affected.len(), 1);
    assert_eq!(first.affected[0].id, e.id);
    assert_eq!(
        engine.selection(e.id).unwrap().get(Dimension::Domain),
        Some(&Selection::explicit(["B"]))
    );

    let second = engine.remove_member(Dimension::Domain, "B").unwrap();
    assert_eq!(second.affected.len(), 1);
    assert_eq!(second.affected[0].prior_encoding, "*|B|*|*");
    assert_eq!(second.affected[0].new_encoding, "*|?|*|*");
    assert_eq!(
        engine.selection(e.id).unwrap().get(Dimension::Domain),
        Some(&Selection::Unresolved)
    );
    assert!(engine.relevance_edges(e.id, Dimension::Domain).unwrap().is_empty());
}

#[test]
fn test_wildcard_immunity() {
    let engine = engine();
    for m in ["A", "B", "C"] {
        engine.add_member(Dimension::Domain, m).unwrap();
    }
    let f = engine.create_entity(EntityKind::Object, "F", "*|*|*|*").unwrap();
    let g = engine.create_entity(EntityKind::Variable, "G", "*|B|*|*").unwrap();

    for m in ["A", "B", "C"] {
        let report = engine.remove_member(Dimension::Domain, m).unwrap();
        assert!(report.affected.iter().all(|a| a.id != f.id));
        let slot = decode_lenient(EntityKind::Object, &engine.get_entity(f.id).unwrap().unwrap().driver_encoding);
        assert_eq!(slot.get(Dimension::Domain), Some(&Selection::Wildcard));
    }

    assert!(engine.relevance_edges(f.id, Dimension::Domain).unwrap().is_empty());
    assert_eq!(engine.get_entity(g.id).unwrap().unwrap().driver_encoding, "*|?|*|*");

    // The wildcard still picks up members created later.
    engine.add_member(Dimension::Domain, "D").unwrap();
    assert_eq!(engine.relevance_edges(f.id, Dimension::Domain).unwrap(), set(&["D"]));
}

#[test]
fn test_unresolved_slot_stays_until_reselected() {
    let engine = engine();
    engine.add_member(Dimension::Sector, "Energy").unwrap();
    let e = engine.create_entity(EntityKind::Object, "E", "Energy|*|*|*").unwrap();
    engine.remove_member(Dimension::Sector, "Energy").unwrap();

    // Re-creating the member does not silently re-tag the entity.
    let report = engine.add_member(Dimension::Sector, "Energy").unwrap();
    assert_eq!(report.entities_linked, 0);
    assert_eq!(engine.get_entity(e.id).unwrap().unwrap().driver_encoding, "?|*|*|*");

    engine.update_drivers(e.id, "Energy|*|*|*").unwrap();
    assert_eq!(engine.relevance_edges(e.id, Dimension::Sector).unwrap(), set(&["Energy"]));
}

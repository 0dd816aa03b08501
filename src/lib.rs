//! # taxocat - Driver-relevance and relationship consistency for catalog graphs
//!
//! taxocat keeps a property graph of catalog entities consistent with the
//! dimension taxonomy they are tagged against.
//!
//! ## Core Concepts
//!
//! - **Dimension**: a classification axis whose members are opaque string keys
//! - **Driver encoding**: a compact per-entity string naming, slot by slot,
//!   which members apply (`*` for all, `?` for unresolved)
//! - **Relevance edges**: the entity-to-member edges derived from the encoding
//! - **Default relationships**: one canonical relationship per ordered pair of
//!   Object entities, maintained by bootstrap and reconcile passes
//! - **Cascade**: member deletion rewrites every encoding that named the member
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use taxocat::{CatalogEngine, Dimension, EngineConfig, EntityKind, InMemoryGraphStore};
//!
//! let engine = CatalogEngine::new(Arc::new(InMemoryGraphStore::new()), EngineConfig::default())?;
//! engine.add_member(Dimension::Sector, "Energy")?;
//! let customers = engine.create_entity(EntityKind::Object, "Customers", "Energy|*|*|*")?;
//! let report = engine.remove_member(Dimension::Sector, "Energy")?;
//! assert_eq!(report.affected[0].new_encoding, "?|*|*|*");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod dimension;
pub mod driver;
pub mod entity;
pub mod error;
pub mod relationship;

// Storage, configuration and passes
pub mod config;
pub mod engine;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use config::EngineConfig;
pub use dimension::{Dimension, MembershipSnapshot};
pub use driver::{decode, decode_lenient, encode, normalize, CodecError, DriverSelection, Selection};
pub use entity::{Entity, EntityId, EntityKind};
pub use error::{CatalogError, CatalogResult, ExecutionError, ValidationError};
pub use relationship::{DefaultRelationshipPolicy, Relationship, RelationshipId};

pub use engine::{
    resolve_selection, AffectedEntity, AffectedEntityReport, BootstrapReport, CatalogEngine,
    EntityFailure, MemberAddedReport, NormalizeOutcome, NormalizeReport, PairFailure,
    ReconcileReport, RelevanceDrift, RelevanceOutcome, RelevancePassReport, SlotDrift,
};
pub use storage::{
    DimensionRegistry, EntityStore, GraphStore, InMemoryGraphStore, MemberStore,
    RelationshipStore, RelevanceStore, StorageError,
};

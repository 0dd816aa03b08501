//! Catalog entities and identity.
//!
//! Entities are the tagged items of the catalog: Objects and Variables.
//! Each carries a driver encoding summarizing which dimension members
//! apply to it, and a cached count of its canonical outbound default
//! relationships.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dimension::Dimension;

/// Globally unique, immutable entity identifier.
///
/// # Examples
///
/// ```
/// use taxocat::EntityId;
///
/// let id = EntityId::new();
/// assert!(!id.is_nil());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Creates a new random entity ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an entity ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns true if this is a nil (all zeros) UUID.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EntityId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// The two kinds of catalog entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A catalog object (table-like item).
    Object,
    /// A catalog variable (column-like item).
    Variable,
}

const OBJECT_LAYOUT: [Dimension; 4] = [
    Dimension::Sector,
    Dimension::Domain,
    Dimension::Country,
    Dimension::ObjectClarifier,
];

const VARIABLE_LAYOUT: [Dimension; 4] = [
    Dimension::Sector,
    Dimension::Domain,
    Dimension::Country,
    Dimension::VariableClarifier,
];

impl EntityKind {
    /// The fixed slot order of this kind's driver encoding.
    #[must_use]
    pub const fn layout(self) -> &'static [Dimension] {
        match self {
            Self::Object => &OBJECT_LAYOUT,
            Self::Variable => &VARIABLE_LAYOUT,
        }
    }

    /// Returns true if `dimension` is one of this kind's driver slots.
    #[must_use]
    pub fn uses(self, dimension: Dimension) -> bool {
        self.layout().contains(&dimension)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object => write!(f, "object"),
            Self::Variable => write!(f, "variable"),
        }
    }
}

/// A catalog entity node.
///
/// The driver encoding is the persisted, displayed form of the entity's
/// selections. Relevance edges and default relationships are derived
/// state held by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Globally unique identifier
    pub id: EntityId,

    pub kind: EntityKind,

    /// Display name; also the `role` of its canonical outbound defaults.
    pub name: String,

    pub driver_encoding: String,

    /// Cached number of canonical outbound default relationships.
    #[serde(default)]
    pub relationship_count: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Creates a new entity with the given kind, name and driver encoding.
    ///
    /// # Examples
    ///
    /// ```
    /// use taxocat::{Entity, EntityKind};
    ///
    /// let entity = Entity::new(EntityKind::Object, "Customers", "*|*|*|*");
    /// assert_eq!(entity.relationship_count, 0);
    /// ```
    #[must_use]
    pub fn new(kind: EntityKind, name: impl Into<String>, driver_encoding: impl Into<String>) -> Self {
        Self::with_id(EntityId::new(), kind, name, driver_encoding)
    }

    /// Creates a new entity with a specific ID.
    ///
    /// Useful for imports where identifiers are assigned upstream.
    #[must_use]
    pub fn with_id(
        id: EntityId,
        kind: EntityKind,
        name: impl Into<String>,
        driver_encoding: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            name: name.into(),
            driver_encoding: driver_encoding.into(),
            relationship_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Entity {}

impl std::hash::Hash for Entity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

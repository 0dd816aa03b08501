//! Relationships between entities of the same kind.
//!
//! Default relationships are the canonical baseline maintained between
//! every ordered pair of Objects (self-pairs included). A relationship is
//! a default iff it satisfies the canonical predicate of the configured
//! [`DefaultRelationshipPolicy`]; anything else is user-added.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{Entity, EntityId, EntityKind};

/// Unique identifier for a relationship.
///
/// Ordering matches the lexicographic order of the hyphenated string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipId(Uuid);

impl RelationshipId {
    /// Creates a new random relationship ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a relationship ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for RelationshipId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A directed relationship from `source` to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub source: EntityId,
    pub target: EntityId,
    pub role: String,
    pub frequency: String,
    #[serde(rename = "type")]
    pub rel_type: String,

    /// Denormalized target descriptor for read efficiency.
    pub target_name: String,
    pub target_kind: EntityKind,

    pub created_at: DateTime<Utc>,
}

impl Relationship {
    /// Creates a relationship between two entities.
    #[must_use]
    pub fn new(
        source: &Entity,
        target: &Entity,
        role: impl Into<String>,
        frequency: impl Into<String>,
        rel_type: impl Into<String>,
    ) -> Self {
        Self {
            id: RelationshipId::new(),
            source: source.id,
            target: target.id,
            role: role.into(),
            frequency: frequency.into(),
            rel_type: rel_type.into(),
            target_name: target.name.clone(),
            target_kind: target.kind,
            created_at: Utc::now(),
        }
    }

    /// Returns true for a relationship from an entity to itself.
    #[must_use]
    pub fn is_self_pair(&self) -> bool {
        self.source == self.target
    }
}

/// The `{role, frequency, type}` predicate identifying default relationships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultRelationshipPolicy {
    /// Frequency carried by every default relationship.
    pub frequency: String,
    /// Type of a default from an entity to itself.
    pub self_type: String,
    /// Type of a default between two distinct entities.
    pub cross_type: String,
}

impl Default for DefaultRelationshipPolicy {
    fn default() -> Self {
        Self {
            frequency: "Critical".to_string(),
            self_type: "Intra-Table".to_string(),
            cross_type: "Inter-Table".to_string(),
        }
    }
}

impl DefaultRelationshipPolicy {
    /// The type a default between `source` and `target` must carry.
    #[must_use]
    pub fn type_for(&self, source: EntityId, target: EntityId) -> &str {
        if source == target {
            &self.self_type
        } else {
            &self.cross_type
        }
    }

    /// Returns true if `rel` is the canonical default for its pair, given
    /// the source entity's current display name.
    #[must_use]
    pub fn is_canonical(&self, rel: &Relationship, source_name: &str) -> bool {
        rel.role == source_name
            && rel.frequency == self.frequency
            && rel.rel_type == self.type_for(rel.source, rel.target)
    }

    /// Build the canonical default for `(source, target)`.
    #[must_use]
    pub fn canonical(&self, source: &Entity, target: &Entity) -> Relationship {
        Relationship::new(
            source,
            target,
            source.name.clone(),
            self.frequency.clone(),
            self.type_for(source.id, target.id).to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(name: &str) -> Entity {
        Entity::new(EntityKind::Object, name, "*|*|*|*")
    }

    #[test]
    fn test_canonical_self_and_cross_types() {
        let policy = DefaultRelationshipPolicy::default();
        let a = object("A");
        let b = object("B");

        let aa = policy.canonical(&a, &a);
        assert!(aa.is_self_pair());
        assert_eq!(aa.rel_type, "Intra-Table");
        assert!(policy.is_canonical(&aa, "A"));

        let ab = policy.canonical(&a, &b);
        assert_eq!(ab.rel_type, "Inter-Table");
        assert_eq!(ab.role, "A");
        assert_eq!(ab.target_name, "B");
        assert!(policy.is_canonical(&ab, "A"));
    }

    #[test]
    fn test_predicate_rejects_each_field() {
        let policy = DefaultRelationshipPolicy::default();
        let a = object("A");
        let b = object("B");
        let base = policy.canonical(&a, &b);

        let mut wrong_role = base.clone();
        wrong_role.role = "X".to_string();
        assert!(!policy.is_canonical(&wrong_role, "A"));

        let mut wrong_freq = base.clone();
        wrong_freq.frequency = "Rare".to_string();
        assert!(!policy.is_canonical(&wrong_freq, "A"));

        let mut wrong_type = base.clone();
        wrong_type.rel_type = policy.self_type.clone();
        assert!(!policy.is_canonical(&wrong_type, "A"));

        // A rename of the source makes the old default non-canonical.
        assert!(!policy.is_canonical(&base, "A (renamed)"));
    }

    #[test]
    fn test_relationship_serializes_type_field() {
        let policy = DefaultRelationshipPolicy::default();
        let a = object("A");
        let rel = policy.canonical(&a, &a);
        let json = serde_json::to_value(&rel).unwrap();
        assert_eq!(json["type"], "Intra-Table");
    }
}

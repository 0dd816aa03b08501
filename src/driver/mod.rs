//! Driver selections and their string encoding.
//!
//! An entity's driver encoding summarizes, per dimension slot, which
//! members apply to it. The structured form is a [`DriverSelection`]: one
//! [`Selection`] per slot of the entity kind's layout.

mod codec;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::dimension::Dimension;
use crate::entity::EntityKind;
use crate::error::ValidationError;

pub use codec::{
    check_member_key, decode, decode_lenient, encode, normalize, CodecError, MEMBER_SEPARATOR,
    SLOT_SEPARATOR, UNRESOLVED_TOKEN, WILDCARD_TOKEN,
};

/// An entity's tag for one dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "members")]
pub enum Selection {
    /// Applies to every member that exists right now.
    Wildcard,
    /// Applies to exactly these members.
    Explicit(BTreeSet<String>),
    /// Was explicit, every referent got deleted; needs user re-selection.
    Unresolved,
}

impl Selection {
    /// Build an explicit selection. An empty set yields `Unresolved`.
    #[must_use]
    pub fn explicit<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = members.into_iter().map(Into::into).collect();
        if set.is_empty() {
            Self::Unresolved
        } else {
            Self::Explicit(set)
        }
    }

    /// Returns `true` if this is `Wildcard`.
    #[must_use]
    pub const fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }

    /// Returns `true` if this is `Unresolved`.
    #[must_use]
    pub const fn is_unresolved(&self) -> bool {
        matches!(self, Self::Unresolved)
    }

    /// Returns true if this explicitly names `member`.
    #[must_use]
    pub fn names(&self, member: &str) -> bool {
        match self {
            Self::Explicit(set) => set.contains(member),
            Self::Wildcard | Self::Unresolved => false,
        }
    }

    /// Drop `member` from an explicit selection.
    ///
    /// An explicit set that becomes empty turns into `Unresolved`. Returns
    /// true if the selection changed.
    pub fn remove_member(&mut self, member: &str) -> bool {
        let Self::Explicit(set) = self else {
            return false;
        };
        if !set.remove(member) {
            return false;
        }
        if set.is_empty() {
            *self = Self::Unresolved;
        }
        true
    }
}

/// The full per-slot selection of an entity, in its kind's layout order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverSelection {
    kind: EntityKind,
    slots: Vec<Selection>,
}

impl DriverSelection {
    /// Every slot set to `Wildcard`.
    #[must_use]
    pub fn wildcard(kind: EntityKind) -> Self {
        Self {
            kind,
            slots: vec![Selection::Wildcard; kind.layout().len()],
        }
    }

    /// Build from slots given in layout order.
    ///
    /// Missing trailing slots are padded with `Wildcard`; surplus slots are
    /// rejected.
    pub fn from_slots(kind: EntityKind, mut slots: Vec<Selection>) -> Result<Self, ValidationError> {
        let expected = kind.layout().len();
        if slots.len() > expected {
            return Err(ValidationError::SlotCountMismatch {
                kind,
                expected,
                actual: slots.len(),
            });
        }
        slots.resize(expected, Selection::Wildcard);
        Ok(Self { kind, slots })
    }

    /// The entity kind this selection is laid out for.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        self.kind
    }

    /// The selection for `dimension`, if the kind has that slot.
    #[must_use]
    pub fn get(&self, dimension: Dimension) -> Option<&Selection> {
        self.slot_index(dimension).map(|i| &self.slots[i])
    }

    /// Mutable access to the selection for `dimension`.
    pub fn get_mut(&mut self, dimension: Dimension) -> Option<&mut Selection> {
        self.slot_index(dimension).map(move |i| &mut self.slots[i])
    }

    /// Replace the selection for `dimension`.
    pub fn set(&mut self, dimension: Dimension, selection: Selection) -> Result<(), ValidationError> {
        let kind = self.kind;
        let slot = self
            .get_mut(dimension)
            .ok_or(ValidationError::DimensionNotApplicable { dimension, kind })?;
        *slot = selection;
        Ok(())
    }

    /// Iterate `(dimension, selection)` pairs in layout order.
    pub fn iter(&self) -> impl Iterator<Item = (Dimension, &Selection)> + '_ {
        self.kind.layout().iter().copied().zip(self.slots.iter())
    }

    pub(crate) fn slots(&self) -> &[Selection] {
        &self.slots
    }

    fn slot_index(&self, dimension: Dimension) -> Option<usize> {
        self.kind.layout().iter().position(|d| *d == dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_empty_is_unresolved() {
        assert_eq!(Selection::explicit(Vec::<String>::new()), Selection::Unresolved);
        assert!(matches!(Selection::explicit(["A"]), Selection::Explicit(_)));
    }

    #[test]
    fn test_remove_member_state_machine() {
        let mut sel = Selection::explicit(["A", "B"]);
        assert!(sel.remove_member("A"));
        assert_eq!(sel, Selection::explicit(["B"]));
        assert!(!sel.remove_member("A"));
        assert!(sel.remove_member("B"));
        assert!(sel.is_unresolved());

        let mut wild = Selection::Wildcard;
        assert!(!wild.remove_member("A"));
        assert!(wild.is_wildcard());
    }

    #[test]
    fn test_from_slots_pads_and_rejects() {
        let sel = DriverSelection::from_slots(EntityKind::Object, vec![Selection::Unresolved]).unwrap();
        assert_eq!(sel.get(Dimension::Sector), Some(&Selection::Unresolved));
        assert_eq!(sel.get(Dimension::ObjectClarifier), Some(&Selection::Wildcard));

        let too_many = vec![Selection::Wildcard; 5];
        assert!(DriverSelection::from_slots(EntityKind::Object, too_many).is_err());
    }

    #[test]
    fn test_set_rejects_foreign_dimension() {
        let mut sel = DriverSelection::wildcard(EntityKind::Object);
        let err = sel
            .set(Dimension::VariableClarifier, Selection::Unresolved)
            .unwrap_err();
        assert!(matches!(err, ValidationError::DimensionNotApplicable { .. }));
        assert!(sel.get(Dimension::VariableClarifier).is_none());
    }
}

//! Classification dimensions and membership snapshots.
//!
//! A dimension is a named classification axis. Its members are opaque
//! string keys created independently of any entity. Passes read the live
//! member sets once, at their start, through [`MembershipSnapshot`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::storage::{DimensionRegistry, StorageError};

/// A classification axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Sector,
    Domain,
    Country,
    ObjectClarifier,
    VariableClarifier,
}

impl Dimension {
    /// Every dimension, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Sector,
        Self::Domain,
        Self::Country,
        Self::ObjectClarifier,
        Self::VariableClarifier,
    ];

    /// Stable lowercase name used in logs and on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sector => "sector",
            Self::Domain => "domain",
            Self::Country => "country",
            Self::ObjectClarifier => "object_clarifier",
            Self::VariableClarifier => "variable_clarifier",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == key)
            .ok_or(ValidationError::UnknownDimension {
                name: s.to_string(),
            })
    }
}

/// Point-in-time copy of member sets for a group of dimensions.
///
/// Taken once per pass so a single pass resolves every entity against the
/// same membership, even if a concurrent request mutates it meanwhile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSnapshot {
    members: BTreeMap<Dimension, BTreeSet<String>>,
}

impl MembershipSnapshot {
    /// Read the current members of each given dimension.
    pub fn capture(
        registry: &dyn DimensionRegistry,
        dimensions: &[Dimension],
    ) -> Result<Self, StorageError> {
        let mut members = BTreeMap::new();
        for &dimension in dimensions {
            if members.contains_key(&dimension) {
                continue;
            }
            members.insert(dimension, registry.list_members(dimension)?);
        }
        Ok(Self { members })
    }

    /// Build a snapshot from explicit member lists.
    #[must_use]
    pub fn from_members<I, S>(dimension: Dimension, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut snapshot = Self::default();
        snapshot.insert(dimension, members);
        snapshot
    }

    /// Replace the member set of one dimension.
    pub fn insert<I, S>(&mut self, dimension: Dimension, members: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.members
            .insert(dimension, members.into_iter().map(Into::into).collect());
    }

    /// Forget one member, e.g. after deleting it mid-pass.
    pub fn remove(&mut self, dimension: Dimension, key: &str) -> bool {
        self.members
            .get_mut(&dimension)
            .is_some_and(|set| set.remove(key))
    }

    /// Members of `dimension`, empty if the dimension was not captured.
    #[must_use]
    pub fn members(&self, dimension: Dimension) -> &BTreeSet<String> {
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        self.members.get(&dimension).unwrap_or(&EMPTY)
    }

    /// Returns true if `key` is a member of `dimension` in this snapshot.
    #[must_use]
    pub fn contains(&self, dimension: Dimension, key: &str) -> bool {
        self.members(dimension).contains(key)
    }
}

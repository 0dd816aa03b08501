//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CatalogResult, ValidationError};
use crate::relationship::DefaultRelationshipPolicy;

/// Tunables for [`crate::CatalogEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Frequency carried by default relationships.
    pub default_frequency: String,
    /// Type of the default relationship from an entity to itself.
    pub self_relationship_type: String,
    /// Type of the default relationship between two distinct entities.
    pub cross_relationship_type: String,
    /// Pairs failing back to back before a reconciliation pass gives up.
    pub max_consecutive_pair_failures: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let policy = DefaultRelationshipPolicy::default();
        Self {
            default_frequency: policy.frequency,
            self_relationship_type: policy.self_type,
            cross_relationship_type: policy.cross_type,
            max_consecutive_pair_failures: 32,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration document.
    pub fn from_json_str(json: &str) -> CatalogResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("invalid JSON: {e}"),
        })?;
        config.validate()
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_json_str(&raw)
    }

    /// Check invariants the engine relies on.
    pub fn validate(self) -> CatalogResult<Self> {
        let invalid = |reason: &str| ValidationError::InvalidConfig {
            reason: reason.to_string(),
        };
        if self.default_frequency.trim().is_empty() {
            return Err(invalid("default_frequency cannot be empty").into());
        }
        if self.self_relationship_type.trim().is_empty()
            || self.cross_relationship_type.trim().is_empty()
        {
            return Err(invalid("relationship types cannot be empty").into());
        }
        // Equal types would make self and cross defaults indistinguishable.
        if self.self_relationship_type == self.cross_relationship_type {
            return Err(invalid("self and cross relationship types must differ").into());
        }
        if self.max_consecutive_pair_failures == 0 {
            return Err(invalid("max_consecutive_pair_failures must be at least 1").into());
        }
        Ok(self)
    }

    /// The canonical predicate derived from this configuration.
    #[must_use]
    pub fn policy(&self) -> DefaultRelationshipPolicy {
        DefaultRelationshipPolicy {
            frequency: self.default_frequency.clone(),
            self_type: self.self_relationship_type.clone(),
            cross_type: self.cross_relationship_type.clone(),
        }
    }
}

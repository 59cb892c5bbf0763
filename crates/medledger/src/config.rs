//! Engine configuration.

use serde::Deserialize;

use medledger_access::SharePolicy;

use crate::error::{EngineError, Result};

/// Configuration for the Engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Record patient shares against the chain's current version, whatever
    /// version id the caller names. When off, sharing a superseded version
    /// is an invalid transition.
    pub share_resolves_to_current: bool,

    /// Append a grant even when the recipient already has access.
    pub record_redundant_grants: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            share_resolves_to_current: true,
            record_redundant_grants: true,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub(crate) fn share_policy(&self) -> SharePolicy {
        SharePolicy {
            resolve_to_current: self.share_resolves_to_current,
            record_redundant_grants: self.record_redundant_grants,
        }
    }
}

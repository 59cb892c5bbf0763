//! Strong type definitions for medledger.
//!
//! All identifiers are newtypes to prevent mixing a report id with a version
//! id or an actor id at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier. Surrounding whitespace is trimmed.
            pub fn new(id: impl Into<String>) -> Self {
                let id = id.into();
                let trimmed = id.trim();
                if trimmed.len() == id.len() {
                    Self(id)
                } else {
                    Self(trimmed.to_string())
                }
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume into the owned string.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self::new(id)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

string_id!(
    /// Identifier of one report version, e.g. `R-2025-0002`.
    VersionId
);

string_id!(
    /// Identifier of a report family: the version id of its first issuance.
    ///
    /// Stable for the lifetime of the chain, even after updates.
    ReportId
);

string_id!(
    /// Identifier of a patient, lab, hospital or doctor, e.g. `PAT-123`.
    ActorId
);

impl ReportId {
    /// The origin version of this chain.
    pub fn as_version(&self) -> VersionId {
        VersionId(self.0.clone())
    }
}

impl VersionId {
    /// Treat this version as the origin of a new chain.
    pub fn to_report_id(&self) -> ReportId {
        ReportId(self.0.clone())
    }
}

impl PartialEq<VersionId> for ReportId {
    fn eq(&self, other: &VersionId) -> bool {
        self.0 == other.0
    }
}

impl PartialEq<ReportId> for VersionId {
    fn eq(&self, other: &ReportId) -> bool {
        self.0 == other.0
    }
}

/// A 32-byte ledger entry identifier, computed as Blake3(canonical_entry_bytes(entry)).
///
/// Two entries with the same content have the same EntryId.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub [u8; 32]);

impl EntryId {
    /// Create a new EntryId from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

//! Type-safe, prefixed entity identifiers.
//!
//! Each entity class gets its own newtype around a nonce-based string ID so
//! a `KeyId` and a `KeyspaceId` can never be mixed up at compile time, the
//! same guarantee the UUID-based `EntityIdType` system gives elsewhere —
//! here the underlying representation is a generated nonce string with a
//! fixed prefix rather than a UUID, because that's what the wire format
//! requires (`ks_`, `k_`, `sk_`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::generate;

macro_rules! define_id {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Generate a fresh, randomly-nonced identifier.
            pub fn generate() -> Self {
                Self(format!("{}{}", $prefix, generate::id_nonce()))
            }

            /// Wrap an already-formatted identifier, e.g. one read back
            /// from storage or parsed off the wire.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(KeyspaceId, "ks_", "Identifier for a keyspace (`ks_` prefix).");
define_id!(KeyId, "k_", "Identifier for an end-user key (`k_` prefix).");
define_id!(ServiceKeyId, "sk_", "Identifier for a service key (`sk_` prefix).");

impl ServiceKeyId {
    /// The fixed identifier of the bootstrap root service key.
    ///
    /// Not nonce-generated: a fresh database always gets exactly one
    /// well-known root identity so the first admin credential is
    /// reproducible across restarts of the same root token.
    pub fn root() -> Self {
        Self("sk_root".to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == "sk_root"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_their_prefix() {
        let ksid = KeyspaceId::generate();
        assert!(ksid.as_str().starts_with("ks_"));
        assert_eq!(ksid.as_str().len(), 3 + 22);
    }

    #[test]
    fn distinct_id_types_do_not_collide_in_formatting() {
        let kid = KeyId::generate();
        let skid = ServiceKeyId::generate();
        assert!(kid.as_str().starts_with("k_"));
        assert!(skid.as_str().starts_with("sk_"));
    }

    #[test]
    fn root_skid_is_stable() {
        assert_eq!(ServiceKeyId::root().as_str(), "sk_root");
        assert!(ServiceKeyId::root().is_root());
    }

    #[test]
    fn serde_roundtrip_is_transparent_string() {
        let id = KeyId::from_raw("k_abcdefghijklmnopqrstuv");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"k_abcdefghijklmnopqrstuv\"");
        let back: KeyId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}

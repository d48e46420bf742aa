//! Read/write capability policies, keyed by keyspace id or the `"*"`
//! wildcard.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The two capabilities a policy can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
}

/// A `{read, write}` capability pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
}

impl Policy {
    pub fn grants(&self, action: Action) -> bool {
        match action {
            Action::Read => self.read,
            Action::Write => self.write,
        }
    }
}

/// The wildcard key that grants a capability over every keyspace.
pub const WILDCARD: &str = "*";

/// A mapping from keyspace id (or [`WILDCARD`]) to [`Policy`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Policies(pub HashMap<String, Policy>);

impl Policies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `policies["*"]` first; if it grants `action`, allow. Otherwise
    /// fall through to `policies[id]`. A missing entry denies.
    pub fn can(&self, action: Action, id: &str) -> bool {
        if let Some(wildcard) = self.0.get(WILDCARD) {
            if wildcard.grants(action) {
                return true;
            }
        }
        self.0.get(id).is_some_and(|p| p.grants(action))
    }

    pub fn insert(&mut self, id: impl Into<String>, policy: Policy) {
        self.0.insert(id.into(), policy);
    }

    pub fn get(&self, id: &str) -> Option<&Policy> {
        self.0.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_grants_over_any_keyspace() {
        let mut policies = Policies::new();
        policies.insert(WILDCARD, Policy { read: true, write: false });
        assert!(policies.can(Action::Read, "ks_anything"));
        assert!(!policies.can(Action::Write, "ks_anything"));
    }

    #[test]
    fn specific_grant_used_when_no_wildcard() {
        let mut policies = Policies::new();
        policies.insert("ks_abc", Policy { read: true, write: true });
        assert!(policies.can(Action::Read, "ks_abc"));
        assert!(!policies.can(Action::Read, "ks_other"));
    }

    #[test]
    fn missing_entry_denies() {
        let policies = Policies::new();
        assert!(!policies.can(Action::Read, "ks_abc"));
    }

    #[test]
    fn wildcard_denial_still_falls_through_to_specific_grant() {
        let mut policies = Policies::new();
        policies.insert(WILDCARD, Policy { read: false, write: false });
        policies.insert("ks_abc", Policy { read: true, write: false });
        assert!(policies.can(Action::Read, "ks_abc"));
    }
}

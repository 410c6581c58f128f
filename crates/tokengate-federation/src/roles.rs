//! Role and affiliation lookup for federated identities.

use crate::errors::*;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokengate_tokens::Identity;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleAssignment {
    pub roles: Vec<String>,
    pub affiliations: Vec<String>,
}

/// Source of authorization data attached to minted tokens.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    /// Assignment for `identity`. Unknown identities get an empty assignment.
    async fn lookup(&self, identity: &Identity) -> Result<RoleAssignment>;
}

/// Role directory held in memory, keyed by identity id.
#[derive(Debug, Default)]
pub struct InMemoryRoleDirectory {
    assignments: RwLock<HashMap<String, RoleAssignment>>,
}

impl InMemoryRoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&self, identity_id: impl Into<String>, assignment: RoleAssignment) {
        self.assignments.write().insert(identity_id.into(), assignment);
    }

    pub fn len(&self) -> usize {
        self.assignments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parse `id=role|role@affiliation|affiliation;id=...`.
    ///
    /// Example: `github:42=admin|dev@acme;google:7=viewer`.
    pub fn parse(entries: &str) -> Result<Self> {
        let directory = Self::new();
        for entry in entries.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (id, rest) = entry.split_once('=').ok_or_else(|| {
                FederationError::InvalidConfiguration(format!("role entry {:?} has no '='", entry))
            })?;
            let (roles, affiliations) = rest.split_once('@').unwrap_or((rest, ""));
            directory.assign(
                id.trim(),
                RoleAssignment {
                    roles: split_list(roles),
                    affiliations: split_list(affiliations),
                },
            );
        }
        Ok(directory)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split('|')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl RoleDirectory for InMemoryRoleDirectory {
    async fn lookup(&self, identity: &Identity) -> Result<RoleAssignment> {
        Ok(self
            .assignments
            .read()
            .get(identity.id())
            .cloned()
            .unwrap_or_default())
    }
}

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use cyclekit_core::{EnterpriseId, UserId};

use crate::Role;

/// An authenticated actor, as handed to the engine by the session layer.
///
/// Authentication happens elsewhere; by the time a `Principal` exists its
/// roles and managed enterprises are trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub roles: Vec<Role>,
    /// Enterprises this user manages (ignored for admins).
    pub managed_enterprises: BTreeSet<EnterpriseId>,
}

impl Principal {
    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            roles: vec![Role::ADMIN],
            managed_enterprises: BTreeSet::new(),
        }
    }

    pub fn manager(user_id: UserId, enterprises: impl IntoIterator<Item = EnterpriseId>) -> Self {
        Self {
            user_id,
            roles: Vec::new(),
            managed_enterprises: enterprises.into_iter().collect(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(Role::is_admin)
    }

    /// Step one of every access decision: the set of enterprises this actor
    /// speaks for.
    pub fn enterprise_scope(&self) -> EnterpriseScope {
        if self.is_admin() {
            EnterpriseScope::All
        } else {
            EnterpriseScope::Only(self.managed_enterprises.clone())
        }
    }
}

/// Enterprises an actor is entitled to act for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnterpriseScope {
    /// Unrestricted (admin).
    All,
    Only(BTreeSet<EnterpriseId>),
}

impl EnterpriseScope {
    pub fn contains(&self, enterprise_id: EnterpriseId) -> bool {
        match self {
            EnterpriseScope::All => true,
            EnterpriseScope::Only(ids) => ids.contains(&enterprise_id),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, EnterpriseScope::All)
    }
}

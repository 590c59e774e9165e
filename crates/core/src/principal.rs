//! Principal value object.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::command::RoleClass;
use crate::id::{OrgId, PrincipalId};

/// A simulated or real identity capable of issuing queries.
///
/// Construction is decoupled from any session mechanism: the verify crate
/// opens scoped database sessions *from* a `Principal`, never the other way
/// around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub role_class: RoleClass,
    /// Organization memberships (tenancy boundary). Sorted for determinism.
    pub memberships: BTreeSet<OrgId>,
}

impl Principal {
    /// An anonymous visitor: no identity claims, no memberships.
    pub fn anonymous() -> Self {
        Self {
            id: PrincipalId::from_uuid(uuid::Uuid::nil()),
            role_class: RoleClass::Anonymous,
            memberships: BTreeSet::new(),
        }
    }

    /// An authenticated user with no org memberships.
    pub fn user(id: PrincipalId) -> Self {
        Self {
            id,
            role_class: RoleClass::Authenticated,
            memberships: BTreeSet::new(),
        }
    }

    /// An authenticated member of the given organizations.
    pub fn member_of(id: PrincipalId, orgs: impl IntoIterator<Item = OrgId>) -> Self {
        Self {
            id,
            role_class: RoleClass::Authenticated,
            memberships: orgs.into_iter().collect(),
        }
    }

    /// An elevated service-role identity (bypasses row-level checks by
    /// convention in the target engine).
    pub fn service(id: PrincipalId) -> Self {
        Self {
            id,
            role_class: RoleClass::Service,
            memberships: BTreeSet::new(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.role_class == RoleClass::Anonymous
    }

    pub fn has_membership(&self, org: OrgId) -> bool {
        self.memberships.contains(&org)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_checks() {
        let org_a = OrgId::new();
        let org_b = OrgId::new();
        let p = Principal::member_of(PrincipalId::new(), [org_a]);
        assert!(p.has_membership(org_a));
        assert!(!p.has_membership(org_b));
    }

    #[test]
    fn anonymous_has_nil_identity_and_no_memberships() {
        let p = Principal::anonymous();
        assert!(p.is_anonymous());
        assert!(p.memberships.is_empty());
        assert!(p.id.as_uuid().is_nil());
    }
}

//! Isolation templates and the render entry point.

use core::str::FromStr;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use rowguard_core::{ColumnName, Command, RoleClass, SchemaSnapshot, TableProfile, TableRef};

use crate::definition::{PolicyDefinition, PolicyName};
use crate::predicate::Predicate;

/// Template parameter error.
///
/// All of these are non-retryable: fix the input (or the schema) and render
/// again.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("table {table} not present in schema snapshot")]
    UnknownTable { table: TableRef },

    #[error("column '{column}' does not exist on {table}")]
    UnknownColumn { table: TableRef, column: ColumnName },

    #[error("table {table} declares no ownership column (required by user-isolation)")]
    MissingOwnershipColumn { table: TableRef },

    #[error("table {table} declares no tenancy column (required by multi-tenant)")]
    MissingTenancyColumn { table: TableRef },

    #[error("tenancy column '{tenant_column}' on {table} has no backing membership relation '{relation}'")]
    MissingMembershipRelation {
        table: TableRef,
        tenant_column: ColumnName,
        relation: TableRef,
    },

    #[error("role-based template for {table} allows no roles for {command}")]
    EmptyRoleList { table: TableRef, command: Command },

    #[error("invalid role token '{0}': only [a-z0-9_-] is accepted")]
    InvalidRoleToken(String),
}

/// Identity of a template kind (parameter-free), used in policy names and on
/// the CLI surface.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateId {
    UserIsolation,
    MultiTenant,
    RoleBased,
    ResourceLinked,
}

impl TemplateId {
    /// Lowercase token used in deterministic policy names.
    pub fn token(&self) -> &'static str {
        match self {
            TemplateId::UserIsolation => "user_isolation",
            TemplateId::MultiTenant => "multi_tenant",
            TemplateId::RoleBased => "role_based",
            TemplateId::ResourceLinked => "resource_linked",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateId::UserIsolation => "user-isolation",
            TemplateId::MultiTenant => "multi-tenant",
            TemplateId::RoleBased => "role-based",
            TemplateId::ResourceLinked => "resource-linked",
        }
    }
}

impl core::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user-isolation" => Ok(TemplateId::UserIsolation),
            "multi-tenant" => Ok(TemplateId::MultiTenant),
            "role-based" => Ok(TemplateId::RoleBased),
            "resource-linked" => Ok(TemplateId::ResourceLinked),
            other => Err(format!(
                "unknown template '{other}' (expected user-isolation, multi-tenant, role-based, or resource-linked)"
            )),
        }
    }
}

/// The relation that backs tenancy membership lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRelation {
    pub relation: TableRef,
    pub org_column: ColumnName,
    pub member_column: ColumnName,
}

impl MembershipRelation {
    /// Conventional `public.org_members(org_id, user_id)` shape.
    pub fn conventional() -> Self {
        Self {
            relation: TableRef::new("public", "org_members").expect("static identifiers"),
            org_column: ColumnName::new("org_id").expect("static identifiers"),
            member_column: ColumnName::new("user_id").expect("static identifiers"),
        }
    }
}

/// Link from a child table to the parent whose ownership it inherits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    pub parent: TableRef,
    pub parent_key: ColumnName,
    pub fk_column: ColumnName,
    pub parent_owner_column: ColumnName,
}

/// A parameterized isolation template.
///
/// `render` is the single entry point of the engine: pure, deterministic,
/// and validating every referenced identifier against the snapshot before any
/// predicate exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyTemplate {
    /// Rows belong to the principal whose id is in the ownership column.
    UserIsolation,

    /// Rows belong to an organization; access requires membership,
    /// established through `membership`.
    MultiTenant { membership: MembershipRelation },

    /// Access is granted per command to principals holding an allowed
    /// application role (read from the `claim` JWT claim).
    RoleBased {
        claim: String,
        allowed_roles: BTreeMap<Command, Vec<String>>,
    },

    /// Rows inherit ownership from a parent row through a foreign key.
    ResourceLinked { link: ParentLink },
}

impl PolicyTemplate {
    pub fn id(&self) -> TemplateId {
        match self {
            PolicyTemplate::UserIsolation => TemplateId::UserIsolation,
            PolicyTemplate::MultiTenant { .. } => TemplateId::MultiTenant,
            PolicyTemplate::RoleBased { .. } => TemplateId::RoleBased,
            PolicyTemplate::ResourceLinked { .. } => TemplateId::ResourceLinked,
        }
    }

    /// Render this template against a table into concrete policy definitions.
    pub fn render(
        &self,
        profile: &TableProfile,
        snapshot: &SchemaSnapshot,
    ) -> Result<Vec<PolicyDefinition>, TemplateError> {
        let table = &profile.table;
        if !snapshot.contains_table(table) {
            return Err(TemplateError::UnknownTable { table: table.clone() });
        }

        match self {
            PolicyTemplate::UserIsolation => {
                let owner = profile
                    .owner_column
                    .clone()
                    .ok_or_else(|| TemplateError::MissingOwnershipColumn { table: table.clone() })?;
                require_column(snapshot, table, &owner)?;
                let predicate = Predicate::OwnerMatch { column: owner };
                Ok(self.per_command_policies(table, RoleClass::Authenticated, &predicate))
            }

            PolicyTemplate::MultiTenant { membership } => {
                let tenant = profile
                    .tenant_column
                    .clone()
                    .ok_or_else(|| TemplateError::MissingTenancyColumn { table: table.clone() })?;
                require_column(snapshot, table, &tenant)?;

                // A tenancy column with no backing membership relation renders
                // an always-false predicate in the engine; reject instead.
                if !snapshot.contains_table(&membership.relation) {
                    return Err(TemplateError::MissingMembershipRelation {
                        table: table.clone(),
                        tenant_column: tenant,
                        relation: membership.relation.clone(),
                    });
                }
                require_column(snapshot, &membership.relation, &membership.org_column)?;
                require_column(snapshot, &membership.relation, &membership.member_column)?;

                let predicate = Predicate::MembershipExists {
                    relation: membership.relation.clone(),
                    org_column: membership.org_column.clone(),
                    member_column: membership.member_column.clone(),
                    tenant_column: tenant,
                };
                Ok(self.per_command_policies(table, RoleClass::Authenticated, &predicate))
            }

            PolicyTemplate::RoleBased { claim, allowed_roles } => {
                validate_role_token(claim)?;
                let mut defs = Vec::with_capacity(allowed_roles.len());
                for (&command, roles) in allowed_roles {
                    if roles.is_empty() {
                        return Err(TemplateError::EmptyRoleList {
                            table: table.clone(),
                            command,
                        });
                    }
                    for role in roles {
                        validate_role_token(role)?;
                    }
                    let predicate = Predicate::RoleIn {
                        claim: claim.clone(),
                        roles: roles.clone(),
                    };
                    defs.push(self.policy_for(table, RoleClass::Authenticated, command, &predicate));
                }
                Ok(defs)
            }

            PolicyTemplate::ResourceLinked { link } => {
                if !snapshot.contains_table(&link.parent) {
                    return Err(TemplateError::UnknownTable { table: link.parent.clone() });
                }
                require_column(snapshot, table, &link.fk_column)?;
                require_column(snapshot, &link.parent, &link.parent_key)?;
                require_column(snapshot, &link.parent, &link.parent_owner_column)?;

                let predicate = Predicate::ParentOwner {
                    parent: link.parent.clone(),
                    parent_key: link.parent_key.clone(),
                    fk_column: link.fk_column.clone(),
                    parent_owner_column: link.parent_owner_column.clone(),
                };
                Ok(self.per_command_policies(table, RoleClass::Authenticated, &predicate))
            }
        }
    }

    /// One policy per concrete command, sharing the same predicate.
    fn per_command_policies(
        &self,
        table: &TableRef,
        role: RoleClass,
        predicate: &Predicate,
    ) -> Vec<PolicyDefinition> {
        Command::CONCRETE
            .iter()
            .map(|&command| self.policy_for(table, role, command, predicate))
            .collect()
    }

    fn policy_for(
        &self,
        table: &TableRef,
        role: RoleClass,
        command: Command,
        predicate: &Predicate,
    ) -> PolicyDefinition {
        // INSERT policies have no USING clause; write commands carry CHECK.
        let using = match command {
            Command::Insert => None,
            _ => Some(predicate.clone()),
        };
        let check = if command.is_write() {
            Some(predicate.clone())
        } else {
            None
        };
        PolicyDefinition {
            name: PolicyName::derive(self.id(), table, command),
            table: table.clone(),
            command,
            role,
            using,
            check,
        }
    }
}

fn require_column(
    snapshot: &SchemaSnapshot,
    table: &TableRef,
    column: &ColumnName,
) -> Result<(), TemplateError> {
    if snapshot.has_column(table, column) {
        Ok(())
    } else {
        Err(TemplateError::UnknownColumn {
            table: table.clone(),
            column: column.clone(),
        })
    }
}

fn validate_role_token(token: &str) -> Result<(), TemplateError> {
    let ok = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(TemplateError::InvalidRoleToken(token.to_string()))
    }
}

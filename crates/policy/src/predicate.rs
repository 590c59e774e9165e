//! Typed predicate expression tree.
//!
//! Predicates are built from validated identifiers and rendered to SQL text
//! in exactly one place ([`Predicate::to_sql`]). Nothing outside this tree is
//! ever spliced into policy DDL, which is what keeps the applier free of
//! injection and unknown-column failures.

use serde::{Deserialize, Serialize};

use rowguard_core::{ColumnName, TableRef};

/// A boolean row predicate, evaluated per row for the executing identity.
///
/// Leaf terms use the target engine's session-identity functions
/// (`auth.uid()`, `auth.jwt()`). The `(select ...)` wrapping lets the planner
/// evaluate the identity once per statement instead of once per row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predicate {
    /// The executing principal owns the row: `(select auth.uid()) = column`.
    OwnerMatch { column: ColumnName },

    /// The executing principal is a member of the row's organization,
    /// established through a membership relation:
    /// `EXISTS (SELECT 1 FROM relation m WHERE m.org = row.tenant AND m.member = auth.uid())`.
    MembershipExists {
        relation: TableRef,
        /// Column on the membership relation holding the organization id.
        org_column: ColumnName,
        /// Column on the membership relation holding the member's principal id.
        member_column: ColumnName,
        /// Column on the protected table holding the organization id.
        tenant_column: ColumnName,
    },

    /// The principal's application role claim is one of the allowed roles:
    /// `(auth.jwt() ->> claim) = ANY (ARRAY[...])`.
    ///
    /// Role tokens are validated at template level; only `[a-z0-9_-]` survives
    /// to this point.
    RoleIn { claim: String, roles: Vec<String> },

    /// The row is reachable from a parent row the principal owns:
    /// `EXISTS (SELECT 1 FROM parent p WHERE p.key = row.fk AND p.owner = auth.uid())`.
    ParentOwner {
        parent: TableRef,
        /// Key column on the parent matched by the child's foreign key.
        parent_key: ColumnName,
        /// Foreign-key column on the protected table.
        fk_column: ColumnName,
        /// Ownership column on the parent.
        parent_owner_column: ColumnName,
    },

    /// Conjunction. Empty renders as `true`.
    And(Vec<Predicate>),

    /// Disjunction. Empty renders as `false`.
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Render to SQL, qualifying row columns against `table`.
    pub fn to_sql(&self, table: &TableRef) -> String {
        match self {
            Predicate::OwnerMatch { column } => {
                format!("(select auth.uid()) = {}.{}", table.quoted(), column.quoted())
            }
            Predicate::MembershipExists {
                relation,
                org_column,
                member_column,
                tenant_column,
            } => format!(
                "EXISTS (SELECT 1 FROM {rel} WHERE {rel}.{org} = {tbl}.{tenant} AND {rel}.{member} = (select auth.uid()))",
                rel = relation.quoted(),
                org = org_column.quoted(),
                tbl = table.quoted(),
                tenant = tenant_column.quoted(),
                member = member_column.quoted(),
            ),
            Predicate::RoleIn { claim, roles } => {
                let list = roles
                    .iter()
                    .map(|r| format!("'{r}'"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("((select auth.jwt()) ->> '{claim}') = ANY (ARRAY[{list}])")
            }
            Predicate::ParentOwner {
                parent,
                parent_key,
                fk_column,
                parent_owner_column,
            } => format!(
                "EXISTS (SELECT 1 FROM {par} WHERE {par}.{key} = {tbl}.{fk} AND {par}.{owner} = (select auth.uid()))",
                par = parent.quoted(),
                key = parent_key.quoted(),
                tbl = table.quoted(),
                fk = fk_column.quoted(),
                owner = parent_owner_column.quoted(),
            ),
            Predicate::And(parts) => {
                if parts.is_empty() {
                    "true".to_string()
                } else {
                    let inner = parts
                        .iter()
                        .map(|p| p.to_sql(table))
                        .collect::<Vec<_>>()
                        .join(" AND ");
                    format!("({inner})")
                }
            }
            Predicate::Or(parts) => {
                if parts.is_empty() {
                    "false".to_string()
                } else {
                    let inner = parts
                        .iter()
                        .map(|p| p.to_sql(table))
                        .collect::<Vec<_>>()
                        .join(" OR ");
                    format!("({inner})")
                }
            }
        }
    }

    /// Columns of the protected table this predicate filters on.
    ///
    /// These are the columns the auditor expects to find indexed.
    pub fn local_columns(&self) -> Vec<ColumnName> {
        match self {
            Predicate::OwnerMatch { column } => vec![column.clone()],
            Predicate::MembershipExists { tenant_column, .. } => vec![tenant_column.clone()],
            Predicate::RoleIn { .. } => vec![],
            Predicate::ParentOwner { fk_column, .. } => vec![fk_column.clone()],
            Predicate::And(parts) | Predicate::Or(parts) => {
                let mut cols: Vec<ColumnName> =
                    parts.iter().flat_map(|p| p.local_columns()).collect();
                cols.sort();
                cols.dedup();
                cols
            }
        }
    }
}

//! The catalog access trait and its error/value types.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rowguard_core::{ColumnName, Command, SchemaSnapshot, TableProfile, TableRef};
use rowguard_policy::PolicyName;

/// Catalog operation error.
///
/// `Connection` is the transient class: callers retry it with bounded backoff
/// (see [`crate::retry`]) before surfacing. Everything else is terminal for
/// the current run.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("connection failure: {0}")]
    Connection(String),

    #[error("catalog query failed: {0}")]
    Query(String),

    #[error("catalog row could not be decoded: {0}")]
    Decode(String),
}

impl CatalogError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CatalogError::Connection(_))
    }
}

/// A policy as installed in the database, read back from the catalog.
///
/// Clause texts come back in the engine's normalized form (the engine
/// re-prints the parse tree), so semantic comparison against rendered
/// definitions goes through [`InstalledPolicy::normalized_using`] rather than
/// raw string equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPolicy {
    pub name: PolicyName,
    pub table: TableRef,
    pub command: Command,
    /// Database roles the policy applies to.
    pub roles: Vec<String>,
    pub permissive: bool,
    pub using_clause: Option<String>,
    pub check_clause: Option<String>,
}

impl InstalledPolicy {
    pub fn normalized_using(&self) -> Option<String> {
        self.using_clause.as_deref().map(normalize_clause)
    }

    pub fn normalized_check(&self) -> Option<String> {
        self.check_clause.as_deref().map(normalize_clause)
    }
}

/// Collapse whitespace and strip redundant outer parens so that clause
/// comparison tolerates the engine's re-printing of predicates.
pub fn normalize_clause(clause: &str) -> String {
    let collapsed: String = clause.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut s = collapsed.as_str();
    while s.starts_with('(') && s.ends_with(')') && balanced_without_outer(s) {
        s = s[1..s.len() - 1].trim();
    }
    s.to_ascii_lowercase()
}

/// True when the outermost parens wrap the whole expression.
fn balanced_without_outer(s: &str) -> bool {
    let inner = &s[1..s.len() - 1];
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Read-only access to enforcement-relevant catalog state.
///
/// Implementations require only catalog-read privilege and must never mutate
/// schema state.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Snapshot of table shapes within a schema (tables and their columns).
    async fn snapshot(&self, schema: &str) -> Result<SchemaSnapshot, CatalogError>;

    /// Per-table enforcement profiles for a schema, ordered by table name.
    async fn table_profiles(&self, schema: &str) -> Result<Vec<TableProfile>, CatalogError>;

    /// Policies installed on one table, ordered by policy name.
    async fn policies(&self, table: &TableRef) -> Result<Vec<InstalledPolicy>, CatalogError>;

    /// Leading columns of every index on the table.
    async fn indexed_columns(&self, table: &TableRef) -> Result<BTreeSet<ColumnName>, CatalogError>;
}

#[async_trait]
impl<C> Catalog for Arc<C>
where
    C: Catalog + ?Sized,
{
    async fn snapshot(&self, schema: &str) -> Result<SchemaSnapshot, CatalogError> {
        (**self).snapshot(schema).await
    }

    async fn table_profiles(&self, schema: &str) -> Result<Vec<TableProfile>, CatalogError> {
        (**self).table_profiles(schema).await
    }

    async fn policies(&self, table: &TableRef) -> Result<Vec<InstalledPolicy>, CatalogError> {
        (**self).policies(table).await
    }

    async fn indexed_columns(&self, table: &TableRef) -> Result<BTreeSet<ColumnName>, CatalogError> {
        (**self).indexed_columns(table).await
    }
}

/// Ownership-column naming conventions recognized when profiling tables.
pub(crate) const OWNER_COLUMN_CANDIDATES: [&str; 3] = ["user_id", "owner_id", "created_by"];

/// Tenancy-column naming conventions recognized when profiling tables.
pub(crate) const TENANT_COLUMN_CANDIDATES: [&str; 3] = ["org_id", "organization_id", "tenant_id"];

/// Derive a profile from a table's columns and its RLS flag.
pub(crate) fn profile_from_columns(
    table: TableRef,
    columns: &BTreeSet<ColumnName>,
    rls_enabled: bool,
) -> TableProfile {
    let find = |candidates: &[&str]| {
        candidates
            .iter()
            .find_map(|c| columns.iter().find(|col| col.as_str() == *c).cloned())
    };
    let mut profile = TableProfile::new(table).with_rls_enabled(rls_enabled);
    profile.owner_column = find(&OWNER_COLUMN_CANDIDATES);
    profile.tenant_column = find(&TENANT_COLUMN_CANDIDATES);
    profile
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_outer_parens_and_case() {
        assert_eq!(
            normalize_clause("( (select auth.uid())  =  user_id )"),
            "(select auth.uid()) = user_id"
        );
        assert_eq!(normalize_clause("(A) AND (B)"), "(a) and (b)");
    }

    #[test]
    fn profile_detects_conventional_columns() {
        let table = TableRef::parse("documents").unwrap();
        let columns: BTreeSet<ColumnName> = ["id", "user_id", "org_id"]
            .into_iter()
            .map(|c| ColumnName::new(c).unwrap())
            .collect();
        let profile = profile_from_columns(table, &columns, true);
        assert_eq!(profile.owner_column.unwrap().as_str(), "user_id");
        assert_eq!(profile.tenant_column.unwrap().as_str(), "org_id");
        assert!(profile.rls_enabled);
    }
}
